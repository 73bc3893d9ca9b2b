//! Error types shared by every rolesync crate.
//!
//! Errors are classified into three kinds that drive how the engine reacts:
//! transient fetch failures skip the affected unit until the next cycle,
//! provisioning failures are recorded per principal or per group, and
//! configuration failures skip the whole server.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout, non-2xx or malformed response from the directory or registry.
    TransientFetch,
    /// A create/grant/revoke/drop against a target database failed.
    Provisioning,
    /// Missing or invalid connection parameters for a server.
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientFetch => write!(f, "transient_fetch"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Error that can occur while reconciling role membership.
#[derive(Debug, Error)]
pub enum SyncError {
    // Fetch errors (transient)
    /// Request did not complete within its timeout.
    #[error("request to {url} timed out after {timeout_secs} seconds")]
    Timeout { url: String, timeout_secs: u64 },

    /// Request could not be sent or its body could not be read.
    #[error("request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Collaborator answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// Body did not match the expected response contract.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// Membership of a group that the registry has not processed yet was requested.
    #[error("group '{group}' on server '{server}' has not been processed")]
    GroupNotProcessed { server: String, group: String },

    // Configuration errors
    /// Connection parameters are missing or malformed.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The server references credentials that are not configured.
    #[error("unknown credentials reference '{reference}'")]
    UnknownCredentials { reference: String },

    // Provisioning errors
    /// A role or principal name cannot be used as a SQL identifier.
    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// Connection or statement failure against a target database.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A database operation exceeded its configured timeout and was rolled back.
    #[error("operation timed out after {timeout_secs} seconds")]
    OperationTimeout { timeout_secs: u64 },

    /// Provisioning a single principal failed.
    #[error("provisioning failed for '{principal}': {message}")]
    Provisioning {
        principal: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Timeout { .. }
            | SyncError::Transport { .. }
            | SyncError::UnexpectedStatus { .. }
            | SyncError::InvalidResponse { .. }
            | SyncError::GroupNotProcessed { .. } => ErrorKind::TransientFetch,
            SyncError::InvalidConfiguration { .. } | SyncError::UnknownCredentials { .. } => {
                ErrorKind::Configuration
            }
            SyncError::InvalidIdentifier { .. }
            | SyncError::Database { .. }
            | SyncError::OperationTimeout { .. }
            | SyncError::Provisioning { .. } => ErrorKind::Provisioning,
        }
    }

    /// Check if retrying on the next cycle may succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout { .. }
                | SyncError::Transport { .. }
                | SyncError::UnexpectedStatus { .. }
                | SyncError::InvalidResponse { .. }
                | SyncError::GroupNotProcessed { .. }
                | SyncError::Database { .. }
                | SyncError::OperationTimeout { .. }
        )
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Timeout { .. } => "TIMEOUT",
            SyncError::Transport { .. } => "TRANSPORT_ERROR",
            SyncError::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            SyncError::InvalidResponse { .. } => "INVALID_RESPONSE",
            SyncError::GroupNotProcessed { .. } => "GROUP_NOT_PROCESSED",
            SyncError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            SyncError::UnknownCredentials { .. } => "UNKNOWN_CREDENTIALS",
            SyncError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            SyncError::Database { .. } => "DATABASE_ERROR",
            SyncError::OperationTimeout { .. } => "OPERATION_TIMEOUT",
            SyncError::Provisioning { .. } => "PROVISIONING_FAILED",
        }
    }

    // Convenience constructors

    /// Create a transport error with source.
    pub fn transport_with_source(
        url: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Transport {
            url: url.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        SyncError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        SyncError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source.
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a provisioning error for a principal.
    pub fn provisioning(principal: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Provisioning {
            principal: principal.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a provisioning error for a principal with source.
    pub fn provisioning_with_source(
        principal: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Provisioning {
            principal: principal.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for rolesync operations.
pub type SyncResult<T> = Result<T, SyncError>;
