//! # rolesync core
//!
//! Shared abstractions for reconciling PostgreSQL role membership with an
//! external directory.
//!
//! - [`types`] - Servers, groups, membership sets, deltas and apply outcomes
//! - [`error`] - Error taxonomy (transient fetch, provisioning, configuration)
//! - [`traits`] - Collaborator traits for the directory, registry and provisioner
//! - [`config`] - Connection timeouts and pool sizing

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ConnectionSettings;
    pub use crate::error::{ErrorKind, SyncError, SyncResult};
    pub use crate::traits::{DirectorySource, RegistrySource, RoleProvisioner};
    pub use crate::types::{
        ApplyOutcome, Group, GroupState, MembershipDelta, MembershipSet, PrincipalAction,
        PrincipalFailure, Server,
    };
}
