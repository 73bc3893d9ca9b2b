//! Data model for role membership reconciliation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SyncError, SyncResult};

/// A set of principal names.
///
/// Ordered so that deltas and reports are deterministic.
pub type MembershipSet = BTreeSet<String>;

/// A managed PostgreSQL server as registered in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Unique server name.
    pub name: String,

    /// Connection endpoint as `host`, `host:port` or `[ipv6]:port`.
    pub connection: String,

    /// Database to connect to (falls back to the provisioner default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Name of the credentials entry used to connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

impl Server {
    /// Create a server with required fields.
    pub fn new(name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            database: None,
            credentials: None,
        }
    }

    /// Set database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set credentials reference.
    pub fn with_credentials(mut self, reference: impl Into<String>) -> Self {
        self.credentials = Some(reference.into());
        self
    }

    /// Split the connection string into host and optional port.
    pub fn endpoint(&self) -> SyncResult<(String, Option<u16>)> {
        let connection = self.connection.trim();
        if connection.is_empty() {
            return Err(SyncError::invalid_configuration(format!(
                "server '{}' has no connection endpoint",
                self.name
            )));
        }

        // Bracketed IPv6 literal, optionally followed by a port.
        if let Some(rest) = connection.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                SyncError::invalid_configuration(format!(
                    "server '{}' has malformed endpoint '{connection}'",
                    self.name
                ))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(self.parse_port(port)?),
                None if tail.is_empty() => None,
                None => {
                    return Err(SyncError::invalid_configuration(format!(
                        "server '{}' has malformed endpoint '{connection}'",
                        self.name
                    )))
                }
            };
            return Ok((host.to_string(), port));
        }

        match connection.rsplit_once(':') {
            // A bare IPv6 address has several colons and no port.
            Some((host, _)) if host.contains(':') => Ok((connection.to_string(), None)),
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(SyncError::invalid_configuration(format!(
                        "server '{}' has no host in endpoint '{connection}'",
                        self.name
                    )));
                }
                Ok((host.to_string(), Some(self.parse_port(port)?)))
            }
            None => Ok((connection.to_string(), None)),
        }
    }

    fn parse_port(&self, port: &str) -> SyncResult<u16> {
        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(SyncError::invalid_configuration(format!(
                "server '{}' has invalid port '{port}'",
                self.name
            ))),
            Ok(port) => Ok(port),
        }
    }
}

/// A group registered for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name; also the name of the role it maps to on the server.
    pub name: String,

    /// Whether the registry has resolved this group's membership.
    pub processed: bool,

    /// Roles conferred on members of this group, in registry order.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Group {
    /// Create a processed group with no conferred roles.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processed: true,
            roles: Vec::new(),
        }
    }

    /// Mark the group as not yet processed.
    #[must_use]
    pub fn unprocessed(mut self) -> Self {
        self.processed = false;
        self
    }

    /// Set conferred roles.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// A group together with its locally recorded membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupState {
    pub group: Group,
    /// Members recorded by the registry. Empty when the group is unprocessed.
    pub members: MembershipSet,
}

/// Additions and removals needed to align current membership with the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipDelta {
    pub to_add: MembershipSet,
    pub to_remove: MembershipSet,
}

impl MembershipDelta {
    /// Whether the delta requires no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of principal operations in this delta.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Operation attempted for a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalAction {
    /// Create the principal if needed and grant the group role.
    Add,
    /// Revoke the group role.
    Remove,
    /// Drop a principal that no longer belongs to any group.
    Deprovision,
}

impl std::fmt::Display for PrincipalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::Deprovision => write!(f, "deprovision"),
        }
    }
}

/// A failed principal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalFailure {
    pub principal: String,
    pub action: PrincipalAction,
    pub kind: ErrorKind,
    /// Stable machine-readable code, see [`SyncError::error_code`].
    pub code: String,
    /// Whether a later run may succeed without intervention.
    #[serde(default)]
    pub transient: bool,
    pub error: String,
}

impl PrincipalFailure {
    /// Record a failure from an error.
    pub fn new(principal: impl Into<String>, action: PrincipalAction, error: &SyncError) -> Self {
        Self {
            principal: principal.into(),
            action,
            kind: error.kind(),
            code: error.error_code().to_string(),
            transient: error.is_transient(),
            error: error.to_string(),
        }
    }
}

/// Result of applying a delta to one group on one server.
///
/// Only changes are recorded: re-adding an existing member or removing an
/// absent one appears in none of the lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Principals that did not exist and were created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<String>,
    /// Principals newly granted the group role.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted: Vec<String>,
    /// Principals whose group role was revoked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revoked: Vec<String>,
    /// Principals dropped after losing their last group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deprovisioned: Vec<String>,
    /// Principals left without groups but kept because dropping them is unsafe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retained: Vec<String>,
    /// Per-principal failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PrincipalFailure>,
}

impl ApplyOutcome {
    /// Whether every principal operation succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record a failure.
    pub fn fail(&mut self, principal: &str, action: PrincipalAction, error: &SyncError) {
        self.failures
            .push(PrincipalFailure::new(principal, action, error));
    }
}
