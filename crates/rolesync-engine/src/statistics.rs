//! Run statistics.

use serde::{Deserialize, Serialize};

use crate::report::{GroupStatus, ServerReport, ServerStatus};

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Servers dispatched.
    #[serde(default)]
    pub servers_attempted: u32,
    /// Servers skipped for configuration errors.
    #[serde(default)]
    pub servers_skipped: u32,
    /// Servers whose group list could not be read.
    #[serde(default)]
    pub servers_failed: u32,
    /// Servers abandoned at the run deadline.
    #[serde(default)]
    pub servers_not_started: u32,
    #[serde(default)]
    pub groups_total: u32,
    #[serde(default)]
    pub groups_in_sync: u32,
    #[serde(default)]
    pub groups_reconciled: u32,
    #[serde(default)]
    pub groups_partial: u32,
    #[serde(default)]
    pub groups_failed: u32,
    #[serde(default)]
    pub groups_skipped: u32,
    #[serde(default)]
    pub groups_planned: u32,
    #[serde(default)]
    pub principals_created: u32,
    #[serde(default)]
    pub principals_added: u32,
    #[serde(default)]
    pub principals_removed: u32,
    #[serde(default)]
    pub principals_deprovisioned: u32,
    /// Principals left without groups but kept as protected.
    #[serde(default)]
    pub principals_retained: u32,
    #[serde(default)]
    pub principal_failures: u32,
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl RunSummary {
    /// Create an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize server reports.
    #[must_use]
    pub fn from_servers(servers: &[ServerReport], not_started: usize) -> Self {
        let mut summary = Self::new();
        summary.servers_not_started = count(not_started);
        for server in servers {
            summary.record_server(server);
        }
        summary
    }

    /// Add one server's results.
    pub fn record_server(&mut self, server: &ServerReport) {
        self.servers_attempted += 1;
        match server.status {
            ServerStatus::Completed => {}
            ServerStatus::Skipped => self.servers_skipped += 1,
            ServerStatus::Failed => self.servers_failed += 1,
        }

        for group in &server.groups {
            self.groups_total += 1;
            match group.status {
                GroupStatus::Skipped => self.groups_skipped += 1,
                GroupStatus::InSync => self.groups_in_sync += 1,
                GroupStatus::Reconciled => self.groups_reconciled += 1,
                GroupStatus::Partial => self.groups_partial += 1,
                GroupStatus::Failed => self.groups_failed += 1,
                GroupStatus::Planned => self.groups_planned += 1,
            }

            if let Some(outcome) = &group.outcome {
                self.principals_created += count(outcome.created.len());
                self.principals_added += count(outcome.granted.len());
                self.principals_removed += count(outcome.revoked.len());
                self.principals_deprovisioned += count(outcome.deprovisioned.len());
                self.principals_retained += count(outcome.retained.len());
                self.principal_failures += count(outcome.failures.len());
            }
        }
    }

    /// Merge another summary into this one.
    pub fn merge(&mut self, other: &RunSummary) {
        self.servers_attempted += other.servers_attempted;
        self.servers_skipped += other.servers_skipped;
        self.servers_failed += other.servers_failed;
        self.servers_not_started += other.servers_not_started;
        self.groups_total += other.groups_total;
        self.groups_in_sync += other.groups_in_sync;
        self.groups_reconciled += other.groups_reconciled;
        self.groups_partial += other.groups_partial;
        self.groups_failed += other.groups_failed;
        self.groups_skipped += other.groups_skipped;
        self.groups_planned += other.groups_planned;
        self.principals_created += other.principals_created;
        self.principals_added += other.principals_added;
        self.principals_removed += other.principals_removed;
        self.principals_deprovisioned += other.principals_deprovisioned;
        self.principals_retained += other.principals_retained;
        self.principal_failures += other.principal_failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{GroupReport, SkipReason};
    use rolesync_core::error::SyncError;
    use rolesync_core::types::{ApplyOutcome, MembershipDelta};

    #[test]
    fn test_summary_from_servers() {
        let outcome = ApplyOutcome {
            created: vec!["alice".to_string()],
            granted: vec!["alice".to_string()],
            revoked: vec!["carol".to_string(), "dba".to_string()],
            deprovisioned: vec!["carol".to_string()],
            retained: vec!["dba".to_string()],
            failures: Vec::new(),
        };
        let mut delta = MembershipDelta::default();
        delta.to_add.insert("alice".to_string());
        delta.to_remove.insert("carol".to_string());
        delta.to_remove.insert("dba".to_string());

        let server1 = ServerReport::new("server1").completed(vec![
            GroupReport::applied("group1", delta, outcome),
            GroupReport::skipped("group2", SkipReason::Unprocessed, None),
        ]);
        let server2 = ServerReport::new("server2")
            .skipped(&SyncError::invalid_configuration("no host"));

        let summary = RunSummary::from_servers(&[server1, server2], 1);
        assert_eq!(summary.servers_attempted, 2);
        assert_eq!(summary.servers_skipped, 1);
        assert_eq!(summary.servers_not_started, 1);
        assert_eq!(summary.groups_total, 2);
        assert_eq!(summary.groups_reconciled, 1);
        assert_eq!(summary.groups_skipped, 1);
        assert_eq!(summary.principals_created, 1);
        assert_eq!(summary.principals_added, 1);
        assert_eq!(summary.principals_removed, 2);
        assert_eq!(summary.principals_deprovisioned, 1);
        assert_eq!(summary.principals_retained, 1);
    }

    #[test]
    fn test_merge() {
        let mut a = RunSummary {
            servers_attempted: 2,
            principals_added: 3,
            ..Default::default()
        };
        let b = RunSummary {
            servers_attempted: 1,
            principal_failures: 1,
            principals_retained: 2,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.servers_attempted, 3);
        assert_eq!(a.principals_added, 3);
        assert_eq!(a.principal_failures, 1);
        assert_eq!(a.principals_retained, 2);
    }
}
