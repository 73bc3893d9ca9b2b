//! Client for the server registry.
//!
//! The registry exposes three read-only resources:
//!
//! - `GET /servers` - `[{"server_name", "connection", "database"?, "credentials"?}]`
//! - `GET /server/{server}` - `{"server_name", "groups": [name, ...]}`
//! - `GET /group/{server}/{group}` - `{"metadata": {"processed", "roles"}, "members"?}`
//!
//! `members` is only present once the registry has processed the group.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use rolesync_core::error::{SyncError, SyncResult};
use rolesync_core::traits::RegistrySource;
use rolesync_core::types::{Group, GroupState, MembershipSet, Server};

use crate::http::{collect_members, JsonClient, MemberEntry};

#[derive(Debug, Deserialize)]
struct ServerRecord {
    server_name: String,
    connection: String,
    #[serde(default)]
    database: Option<String>,
    #[serde(default, alias = "credentials_ref")]
    credentials: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerGroupsResponse {
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupMetadata {
    processed: bool,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupResponse {
    metadata: GroupMetadata,
    #[serde(default)]
    members: Option<Vec<MemberEntry>>,
}

/// Reads servers, groups and recorded membership from the registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    inner: JsonClient,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        Ok(Self {
            inner: JsonClient::new(base_url, timeout, crate::USER_AGENT)?,
        })
    }

    /// Create a registry client with a custom HTTP client (for testing).
    pub fn with_http_client(
        base_url: &str,
        http_client: Client,
        timeout: Duration,
    ) -> SyncResult<Self> {
        Ok(Self {
            inner: JsonClient::with_http_client(base_url, http_client, timeout)?,
        })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.inner.base_url().as_str()
    }
}

#[async_trait]
impl RegistrySource for RegistryClient {
    #[instrument(skip(self))]
    async fn list_servers(&self) -> SyncResult<Vec<Server>> {
        let records: Vec<ServerRecord> = self.inner.get_json(&["servers"]).await?;

        let mut seen = HashSet::new();
        let mut servers = Vec::with_capacity(records.len());
        for record in records {
            let name = record.server_name.trim().to_string();
            if name.is_empty() {
                warn!("Ignoring registry server record without a name");
                continue;
            }
            if !seen.insert(name.clone()) {
                warn!(server = %name, "Ignoring duplicate registry server record");
                continue;
            }

            servers.push(Server {
                name,
                connection: record.connection.trim().to_string(),
                database: non_blank(record.database),
                credentials: non_blank(record.credentials),
            });
        }

        debug!(count = servers.len(), "Listed registry servers");
        Ok(servers)
    }

    #[instrument(skip(self, server), fields(server = %server.name))]
    async fn list_groups(&self, server: &Server) -> SyncResult<Vec<String>> {
        let response: ServerGroupsResponse =
            self.inner.get_json(&["server", &server.name]).await?;

        let mut seen = HashSet::new();
        let groups: Vec<String> = response
            .groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .filter(|g| seen.insert(g.to_string()))
            .map(str::to_string)
            .collect();

        debug!(count = groups.len(), "Listed registry groups");
        Ok(groups)
    }

    #[instrument(skip(self, server), fields(server = %server.name))]
    async fn fetch_group(&self, server: &Server, group: &str) -> SyncResult<GroupState> {
        let url = self.inner.endpoint(&["group", &server.name, group])?;
        let response: GroupResponse = self
            .inner
            .get_json(&["group", &server.name, group])
            .await?;

        let processed = response.metadata.processed;
        let roles: Vec<String> = response
            .metadata
            .roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        let members = match (processed, response.members) {
            (true, Some(entries)) => collect_members(&entries),
            // A processed group without a member list is not the same as an empty one.
            (true, None) => {
                return Err(SyncError::InvalidResponse {
                    url: url.to_string(),
                    message: "processed group has no `members` field".to_string(),
                })
            }
            (false, _) => MembershipSet::new(),
        };

        let mut state_group = Group::new(group).with_roles(roles);
        state_group.processed = processed;

        Ok(GroupState {
            group: state_group,
            members,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
