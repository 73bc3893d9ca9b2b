//! Client for the entitlement directory service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use rolesync_core::error::SyncResult;
use rolesync_core::traits::DirectorySource;
use rolesync_core::types::MembershipSet;

use crate::http::{collect_members, JsonClient, MemberEntry};

const GROUP_RESOURCE: &str = "ldap_group";

#[derive(Debug, Deserialize)]
struct DirectoryGroupResponse {
    members: Vec<MemberEntry>,
}

/// Reads authoritative group membership from the directory service.
///
/// `GET {base}/ldap_group/{group}` answers `{"members": [...]}`.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    inner: JsonClient,
}

impl DirectoryClient {
    /// Create a new directory client.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        Ok(Self {
            inner: JsonClient::new(base_url, timeout, crate::USER_AGENT)?,
        })
    }

    /// Create a directory client with a custom HTTP client (for testing).
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
impl DirectorySource for DirectoryClient {
    #[instrument(skip(self))]
    async fn fetch_members(&self, group: &str) -> SyncResult<MembershipSet> {
        let response: DirectoryGroupResponse =
            self.inner.get_json(&[GROUP_RESOURCE, group]).await?;
        let members = collect_members(&response.members);
        debug!(count = members.len(), "Fetched directory members");
        Ok(members)
    }
}
