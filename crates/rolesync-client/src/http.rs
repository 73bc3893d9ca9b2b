//! JSON-over-HTTP plumbing shared by the directory and registry clients.

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use rolesync_core::error::{SyncError, SyncResult};
use rolesync_core::types::MembershipSet;

/// Read-only JSON client bound to a base URL.
#[derive(Debug, Clone)]
pub struct JsonClient {
    base_url: Url,
    http_client: Client,
    timeout: Duration,
}

impl JsonClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> SyncResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                SyncError::invalid_configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Self::with_http_client(base_url, http_client, timeout)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    ///
    /// `timeout` is only used for error reporting; the client's own timeout applies.
    pub fn with_http_client(
        base_url: &str,
        http_client: Client,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| {
            SyncError::invalid_configuration(format!("invalid base URL '{base_url}': {e}"))
        })?;

        if base_url.cannot_be_a_base() {
            return Err(SyncError::invalid_configuration(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            base_url,
            http_client,
            timeout,
        })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a URL by appending percent-encoded path segments to the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SyncError::invalid_configuration(format!(
                    "base URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET a resource and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> SyncResult<T> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "GET");

        let response = self
            .http_client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        self.handle_response(&url, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        url: &Url,
        response: reqwest::Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(url, e))?;

        serde_json::from_str(&body).map_err(|e| SyncError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn map_send_error(&self, url: &Url, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            SyncError::transport_with_source(url.as_str(), "request failed", error)
        }
    }
}

/// A member as returned by the directory or registry.
///
/// Both plain names and records carrying a `name` field are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MemberEntry {
    Name(String),
    Record { name: String },
}

impl MemberEntry {
    fn name(&self) -> &str {
        match self {
            MemberEntry::Name(name) | MemberEntry::Record { name } => name,
        }
    }
}

/// Collapse member entries into a set, trimming names and dropping blanks.
pub(crate) fn collect_members(entries: &[MemberEntry]) -> MembershipSet {
    entries
        .iter()
        .map(|entry| entry.name().trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
}
