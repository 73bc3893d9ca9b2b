//! Collaborator traits.
//!
//! The engine only talks to the directory, the registry and the target
//! databases through these traits, so each can be replaced in tests.

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::types::{ApplyOutcome, Group, GroupState, MembershipDelta, MembershipSet, Server};

/// Authoritative source of group membership.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Fetch the members of a directory group.
    ///
    /// An `Ok` empty set means the group is confirmed empty. Any failure to
    /// read the group must be returned as an error, never as an empty set.
    async fn fetch_members(&self, group: &str) -> SyncResult<MembershipSet>;
}

/// Metadata service tracking servers, groups and recorded membership.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// List every managed server.
    async fn list_servers(&self) -> SyncResult<Vec<Server>>;

    /// List the names of the groups registered for a server.
    async fn list_groups(&self, server: &Server) -> SyncResult<Vec<String>>;

    /// Fetch a group's metadata and recorded membership.
    async fn fetch_group(&self, server: &Server, group: &str) -> SyncResult<GroupState>;

    /// Fetch the recorded membership of a processed group.
    async fn fetch_local_members(&self, server: &Server, group: &str) -> SyncResult<MembershipSet> {
        let state = self.fetch_group(server, group).await?;
        if !state.group.processed {
            return Err(SyncError::GroupNotProcessed {
                server: server.name.clone(),
                group: group.to_string(),
            });
        }
        Ok(state.members)
    }
}

/// Applies membership changes to a server's role system.
#[async_trait]
pub trait RoleProvisioner: Send + Sync {
    /// Check that the server can be provisioned (connection parameters, credentials).
    async fn validate_server(&self, server: &Server) -> SyncResult<()>;

    /// Apply a delta for one group.
    ///
    /// Principal-level failures are collected in the returned outcome. An
    /// `Err` means nothing could be applied for the group at all.
    async fn apply(
        &self,
        server: &Server,
        group: &Group,
        delta: &MembershipDelta,
    ) -> SyncResult<ApplyOutcome>;
}
