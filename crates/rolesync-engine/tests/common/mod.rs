//! Hand-written collaborators for engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rolesync_core::error::{SyncError, SyncResult};
use rolesync_core::traits::{DirectorySource, RegistrySource, RoleProvisioner};
use rolesync_core::types::{
    ApplyOutcome, Group, GroupState, MembershipDelta, MembershipSet, PrincipalAction, Server,
};
use rolesync_engine::{ReconcilerConfig, ServerReconciler};

pub fn set(names: &[&str]) -> MembershipSet {
    names.iter().map(|n| n.to_string()).collect()
}

fn unavailable(url: &str) -> SyncError {
    SyncError::UnexpectedStatus {
        url: url.to_string(),
        status: 503,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockRegistry {
    servers: Vec<Server>,
    groups: HashMap<String, Vec<String>>,
    states: HashMap<(String, String), GroupState>,
    failing_groups: HashSet<(String, String)>,
    failing_group_lists: HashSet<String>,
    fail_server_list: AtomicBool,
    list_groups_delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetch_group_calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server with no groups.
    pub fn with_server(mut self, server: Server) -> Self {
        self.groups.entry(server.name.clone()).or_default();
        self.servers.push(server);
        self
    }

    /// Register a processed group with recorded members.
    pub fn with_group(self, server: &str, group: Group, members: &[&str]) -> Self {
        self.with_state(
            server,
            GroupState {
                group,
                members: set(members),
            },
        )
    }

    pub fn with_state(mut self, server: &str, state: GroupState) -> Self {
        self.groups
            .entry(server.to_string())
            .or_default()
            .push(state.group.name.clone());
        self.states
            .insert((server.to_string(), state.group.name.clone()), state);
        self
    }

    /// List a group whose state cannot be fetched.
    pub fn with_failing_group(mut self, server: &str, group: &str) -> Self {
        self.groups
            .entry(server.to_string())
            .or_default()
            .push(group.to_string());
        self.failing_groups
            .insert((server.to_string(), group.to_string()));
        self
    }

    pub fn with_failing_group_list(mut self, server: &str) -> Self {
        self.failing_group_lists.insert(server.to_string());
        self
    }

    pub fn with_list_groups_delay(mut self, delay: Duration) -> Self {
        self.list_groups_delay = Some(delay);
        self
    }

    pub fn fail_server_list(&self) {
        self.fail_server_list.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistrySource for MockRegistry {
    async fn list_servers(&self) -> SyncResult<Vec<Server>> {
        if self.fail_server_list.load(Ordering::SeqCst) {
            return Err(unavailable("http://registry/servers"));
        }
        Ok(self.servers.clone())
    }

    async fn list_groups(&self, server: &Server) -> SyncResult<Vec<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.list_groups_delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_group_lists.contains(&server.name) {
            return Err(unavailable("http://registry/server"));
        }
        Ok(self.groups.get(&server.name).cloned().unwrap_or_default())
    }

    async fn fetch_group(&self, server: &Server, group: &str) -> SyncResult<GroupState> {
        self.fetch_group_calls.fetch_add(1, Ordering::SeqCst);
        let key = (server.name.clone(), group.to_string());
        if self.failing_groups.contains(&key) {
            return Err(unavailable("http://registry/group"));
        }
        self.states.get(&key).cloned().ok_or_else(|| SyncError::InvalidResponse {
            url: "http://registry/group".to_string(),
            message: "group not found".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDirectory {
    groups: HashMap<String, MembershipSet>,
    failing: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: &str, members: &[&str]) -> Self {
        self.groups.insert(group.to_string(), set(members));
        self
    }

    pub fn with_failing_group(mut self, group: &str) -> Self {
        self.failing.insert(group.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectorySource for MockDirectory {
    async fn fetch_members(&self, group: &str) -> SyncResult<MembershipSet> {
        self.calls.lock().unwrap().push(group.to_string());
        if self.failing.contains(group) {
            return Err(SyncError::Timeout {
                url: format!("http://directory/ldap_group/{group}"),
                timeout_secs: 5,
            });
        }
        Ok(self.groups.get(group).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppliedDelta {
    pub server: String,
    pub group: String,
    pub delta: MembershipDelta,
}

#[derive(Default)]
pub struct MockProvisioner {
    invalid_servers: HashSet<String>,
    failing_groups: HashSet<String>,
    failing_principals: HashSet<String>,
    pub applied: Mutex<Vec<AppliedDelta>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invalid_server(mut self, server: &str) -> Self {
        self.invalid_servers.insert(server.to_string());
        self
    }

    pub fn with_failing_group(mut self, group: &str) -> Self {
        self.failing_groups.insert(group.to_string());
        self
    }

    pub fn with_failing_principal(mut self, principal: &str) -> Self {
        self.failing_principals.insert(principal.to_string());
        self
    }

    pub fn applied(&self) -> Vec<AppliedDelta> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_for(&self, group: &str) -> Option<MembershipDelta> {
        self.applied()
            .into_iter()
            .find(|a| a.group == group)
            .map(|a| a.delta)
    }
}

#[async_trait]
impl RoleProvisioner for MockProvisioner {
    async fn validate_server(&self, server: &Server) -> SyncResult<()> {
        if self.invalid_servers.contains(&server.name) {
            return Err(SyncError::invalid_configuration(format!(
                "server '{}' has no connection endpoint",
                server.name
            )));
        }
        Ok(())
    }

    async fn apply(
        &self,
        server: &Server,
        group: &Group,
        delta: &MembershipDelta,
    ) -> SyncResult<ApplyOutcome> {
        self.applied.lock().unwrap().push(AppliedDelta {
            server: server.name.clone(),
            group: group.name.clone(),
            delta: delta.clone(),
        });

        if self.failing_groups.contains(&group.name) {
            return Err(SyncError::database("connection refused"));
        }

        let mut outcome = ApplyOutcome::default();
        for principal in &delta.to_add {
            if self.failing_principals.contains(principal) {
                outcome.fail(
                    principal,
                    PrincipalAction::Add,
                    &SyncError::provisioning(principal.as_str(), "permission denied"),
                );
            } else {
                outcome.granted.push(principal.clone());
            }
        }
        for principal in &delta.to_remove {
            if self.failing_principals.contains(principal) {
                outcome.fail(
                    principal,
                    PrincipalAction::Remove,
                    &SyncError::provisioning(principal.as_str(), "permission denied"),
                );
            } else {
                outcome.revoked.push(principal.clone());
            }
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn reconciler(
    registry: Arc<MockRegistry>,
    directory: Arc<MockDirectory>,
    provisioner: Arc<MockProvisioner>,
    config: ReconcilerConfig,
) -> ServerReconciler {
    ServerReconciler::new(registry, directory, provisioner, config)
}
