//! Membership delta calculation.

use rolesync_core::types::{MembershipDelta, MembershipSet};

/// Compute the changes that turn `current` into `target`.
///
/// `to_add = target - current`, `to_remove = current - target`.
#[must_use]
pub fn compute_delta(target: &MembershipSet, current: &MembershipSet) -> MembershipDelta {
    MembershipDelta {
        to_add: target.difference(current).cloned().collect(),
        to_remove: current.difference(target).cloned().collect(),
    }
}
