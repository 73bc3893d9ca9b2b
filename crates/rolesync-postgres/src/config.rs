//! Provisioner configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use rolesync_core::config::ConnectionSettings;
use rolesync_core::error::{SyncError, SyncResult};

/// SSL mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No SSL.
    Disable,
    /// Use SSL if available, but don't require it.
    #[default]
    Prefer,
    /// Require SSL.
    Require,
    /// Require SSL and verify CA certificate.
    VerifyCa,
    /// Require SSL and verify CA and hostname.
    VerifyFull,
}

impl SslMode {
    /// Get the string representation used in connection strings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    fn to_pg(self) -> PgSslMode {
        match self {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

impl FromStr for SslMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(SyncError::invalid_configuration(format!(
                "unknown SSL mode '{other}'"
            ))),
        }
    }
}

/// Configuration shared by every server the provisioner talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database used when a server does not name one.
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Port used when a server's endpoint has none.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// SSL mode.
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Connection settings (timeouts, pool size).
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Drop principals that no longer belong to any group.
    #[serde(default = "default_deprovision")]
    pub deprovision: bool,

    /// `application_name` reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_deprovision() -> bool {
    true
}

fn default_application_name() -> String {
    "rolesync".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default_database: default_database(),
            default_port: default_port(),
            ssl_mode: SslMode::default(),
            connection: ConnectionSettings::default(),
            deprovision: default_deprovision(),
            application_name: default_application_name(),
        }
    }
}

impl DatabaseConfig {
    /// Set the default database.
    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = database.into();
        self
    }

    /// Set SSL mode.
    #[must_use]
    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Enable or disable dropping principals without groups.
    #[must_use]
    pub fn with_deprovision(mut self, enabled: bool) -> Self {
        self.deprovision = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.default_database.trim().is_empty() {
            return Err(SyncError::invalid_configuration(
                "default_database is required",
            ));
        }
        if self.default_port == 0 {
            return Err(SyncError::invalid_configuration(
                "default_port must be greater than zero",
            ));
        }
        self.connection.validate()
    }
}

/// Fully resolved connection parameters for one server.
#[derive(Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    password: Option<String>,
    pub ssl_mode: SslMode,
    application_name: String,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl ConnectTarget {
    pub(crate) fn new(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: Option<String>,
        config: &DatabaseConfig,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            ssl_mode: config.ssl_mode,
            application_name: config.application_name.clone(),
        }
    }

    /// Key identifying a connection pool. Excludes the password.
    #[must_use]
    pub fn pool_key(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Build `sqlx` connect options.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .ssl_mode(self.ssl_mode.to_pg())
            .application_name(&self.application_name);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.default_database, "postgres");
        assert_eq!(config.default_port, 5432);
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert!(config.deprovision);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = DatabaseConfig::default().with_default_database(" ");
        assert!(config.validate().is_err());

        let config = DatabaseConfig::default()
            .with_connection(ConnectionSettings::new().with_pool_size(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!("require".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("Verify-Full".parse::<SslMode>().unwrap(), SslMode::VerifyFull);
        assert_eq!("verify_ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert!("sometimes".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_ssl_mode_serialization() {
        let json = serde_json::to_string(&SslMode::VerifyFull).unwrap();
        assert_eq!(json, "\"verify-full\"");
    }

    #[test]
    fn test_target_debug_redacts_password() {
        let target = ConnectTarget::new(
            "db1".to_string(),
            5432,
            "postgres".to_string(),
            "admin".to_string(),
            Some("hunter2".to_string()),
            &DatabaseConfig::default(),
        );
        let debug = format!("{target:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(target.pool_key(), "admin@db1:5432/postgres");
    }
}
