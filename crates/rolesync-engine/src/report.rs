//! Reconciliation reports.
//!
//! One [`GroupReport`] per group, one [`ServerReport`] per server and one
//! [`RunReport`] per run. Reports are serializable and logged as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rolesync_core::error::{ErrorKind, SyncError};
use rolesync_core::types::{ApplyOutcome, MembershipDelta};

use crate::statistics::RunSummary;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Immediate run when the scheduler starts.
    Startup,
    /// Periodic tick.
    Interval,
    /// Explicit "run now" request.
    Manual,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Interval => write!(f, "interval"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of reconciling one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Not reconciled this cycle; see [`SkipReason`].
    Skipped,
    /// Target and current membership already matched.
    InSync,
    /// Every change was applied.
    Reconciled,
    /// Some principal operations failed.
    Partial,
    /// Nothing could be applied for the group.
    Failed,
    /// Dry run: changes were computed but not applied.
    Planned,
}

/// Why a group was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The registry has not processed the group yet.
    Unprocessed,
    /// The registry could not be read.
    RegistryUnavailable,
    /// The directory could not be read.
    DirectoryUnavailable,
}

/// Per-group result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: String,
    pub status: GroupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Computed changes (empty when skipped).
    #[serde(default)]
    pub delta: MembershipDelta,
    /// Applied changes (absent when skipped, failed or planned).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplyOutcome>,
}

impl GroupReport {
    /// A skipped group.
    pub fn skipped(group: impl Into<String>, reason: SkipReason, error: Option<&SyncError>) -> Self {
        Self {
            group: group.into(),
            status: GroupStatus::Skipped,
            skip_reason: Some(reason),
            error_kind: error.map(SyncError::kind),
            error: error.map(ToString::to_string),
            delta: MembershipDelta::default(),
            outcome: None,
        }
    }

    /// A dry-run result.
    pub fn planned(group: impl Into<String>, delta: MembershipDelta) -> Self {
        Self {
            group: group.into(),
            status: GroupStatus::Planned,
            skip_reason: None,
            error_kind: None,
            error: None,
            delta,
            outcome: None,
        }
    }

    /// The delta was applied, possibly with principal-level failures.
    pub fn applied(group: impl Into<String>, delta: MembershipDelta, outcome: ApplyOutcome) -> Self {
        let status = if !outcome.is_clean() {
            GroupStatus::Partial
        } else if delta.is_empty() {
            GroupStatus::InSync
        } else {
            GroupStatus::Reconciled
        };
        Self {
            group: group.into(),
            status,
            skip_reason: None,
            error_kind: None,
            error: None,
            delta,
            outcome: Some(outcome),
        }
    }

    /// Applying the delta failed as a whole.
    pub fn failed(group: impl Into<String>, delta: MembershipDelta, error: &SyncError) -> Self {
        Self {
            group: group.into(),
            status: GroupStatus::Failed,
            skip_reason: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            delta,
            outcome: None,
        }
    }
}

/// Outcome of reconciling one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Groups were processed (individual groups may still have failed).
    Completed,
    /// Connection parameters or credentials are invalid.
    Skipped,
    /// The group list could not be read, or the task died.
    Failed,
}

/// Per-server result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReport {
    pub server: String,
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ServerReport {
    /// Start a report for a server.
    pub fn new(server: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            server: server.into(),
            status: ServerStatus::Completed,
            error_kind: None,
            error: None,
            groups: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Finish with the given group reports.
    #[must_use]
    pub fn completed(mut self, groups: Vec<GroupReport>) -> Self {
        self.groups = groups;
        self.finished_at = Utc::now();
        self
    }

    /// Finish as skipped because of a configuration error.
    #[must_use]
    pub fn skipped(mut self, error: &SyncError) -> Self {
        self.status = ServerStatus::Skipped;
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
        self.finished_at = Utc::now();
        self
    }

    /// Finish as failed.
    #[must_use]
    pub fn failed(mut self, kind: Option<ErrorKind>, error: impl Into<String>) -> Self {
        self.status = ServerStatus::Failed;
        self.error_kind = kind;
        self.error = Some(error.into());
        self.finished_at = Utc::now();
        self
    }

    /// Number of groups with the given status.
    #[must_use]
    pub fn count(&self, status: GroupStatus) -> usize {
        self.groups.iter().filter(|g| g.status == status).count()
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Servers were listed and dispatched.
    Completed,
    /// The server list could not be read.
    Failed,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub dry_run: bool,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub servers: Vec<ServerReport>,
    /// Servers abandoned because the run deadline passed before they started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_started: Vec<String>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Start a report.
    #[must_use]
    pub fn new(trigger: RunTrigger, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            dry_run,
            status: RunStatus::Completed,
            error: None,
            started_at: now,
            finished_at: now,
            servers: Vec::new(),
            not_started: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    /// Finish with server results.
    #[must_use]
    pub fn completed(mut self, servers: Vec<ServerReport>, not_started: Vec<String>) -> Self {
        self.summary = RunSummary::from_servers(&servers, not_started.len());
        self.servers = servers;
        self.not_started = not_started;
        self.finished_at = Utc::now();
        self
    }

    /// Finish as a cycle-level failure.
    #[must_use]
    pub fn failed(mut self, error: &SyncError) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Utc::now();
        self
    }

    /// Whether the run failed as a whole.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
