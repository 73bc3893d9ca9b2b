//! Connection settings shared by the HTTP clients and the database provisioner.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Timeouts and pool sizing for outbound connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connect/request timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Upper bound for a single principal operation, in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Connection pool size per server.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    2
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

impl ConnectionSettings {
    /// Create new connection settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    /// Set the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Get connection timeout as Duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get operation timeout as Duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Reject zero timeouts and empty pools.
    pub fn validate(&self) -> SyncResult<()> {
        if self.connection_timeout_secs == 0 {
            return Err(SyncError::invalid_configuration(
                "connection_timeout_secs must be greater than zero",
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(SyncError::invalid_configuration(
                "operation_timeout_secs must be greater than zero",
            ));
        }
        if self.pool_size == 0 {
            return Err(SyncError::invalid_configuration(
                "pool_size must be greater than zero",
            ));
        }
        Ok(())
    }
}
