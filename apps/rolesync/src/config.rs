use std::env::VarError;
use std::time::Duration;

use rolesync_core::config::ConnectionSettings;
use rolesync_core::error::SyncError;
use rolesync_engine::{ReconcilerConfig, RunnerConfig};
use rolesync_postgres::{CredentialStore, Credentials, DatabaseConfig, SslMode};

/// Prefix of variables naming credentials entries.
pub const CREDENTIALS_PREFIX: &str = "DB_CREDENTIALS_";

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Base URL of the registry API.
    pub registry_url: String,

    /// Base URL of the directory service.
    pub directory_url: String,

    /// Timeout applied to every registry and directory request.
    pub http_timeout_secs: u64,

    /// Seconds between scheduled runs.
    pub interval_secs: u64,

    /// Servers reconciled concurrently.
    pub batch_size: usize,

    /// Groups reconciled concurrently within one server.
    pub group_concurrency: usize,

    /// Servers not started within this many seconds of a run are abandoned.
    pub run_deadline_secs: Option<u64>,

    /// Compute and report deltas without changing any database.
    pub dry_run: bool,

    /// Settings shared by every managed database.
    pub database: DatabaseConfig,

    /// Default and named credentials.
    pub credentials: CredentialStore,
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let keys = std::env::vars_os()
            .filter_map(|(key, _)| key.into_string().ok())
            .filter(|key| key.starts_with(CREDENTIALS_PREFIX));
        Self::from_reader(|key| std::env::var(key), keys)
    }

    /// Load configuration from a custom variable reader.
    ///
    /// `keys` lists the variable names available to the reader; only those
    /// starting with [`CREDENTIALS_PREFIX`] are used. This allows tests to
    /// supply variables without mutating process-global environment state.
    pub fn from_reader<F, I>(reader: F, keys: I) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
        I: IntoIterator<Item = String>,
    {
        let registry_url = first_of(&reader, &["REGISTRY_URL", "POSTGREST_URL"])
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let directory_url = first_of(&reader, &["DIRECTORY_URL", "ENTITLEMENT_CACHE_SERVER"])
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let http_timeout_secs = parse_or(&reader, "HTTP_TIMEOUT_SECS", 5u64)?;
        let interval_secs = parse_or(&reader, "SYNC_INTERVAL_SECS", 60u64)?;
        let batch_size = parse_or(&reader, "SYNC_BATCH_SIZE", 10usize)?;
        let group_concurrency = parse_or(&reader, "SYNC_GROUP_CONCURRENCY", 4usize)?;
        let run_deadline_secs = match value(&reader, "SYNC_RUN_DEADLINE_SECS") {
            Some(raw) => Some(parse_value::<u64>("SYNC_RUN_DEADLINE_SECS", &raw)?),
            None => None,
        };
        let dry_run = parse_flag(&reader, "SYNC_DRY_RUN", false)?;

        require_positive("HTTP_TIMEOUT_SECS", http_timeout_secs)?;
        require_positive("SYNC_INTERVAL_SECS", interval_secs)?;
        require_positive("SYNC_BATCH_SIZE", batch_size as u64)?;
        require_positive("SYNC_GROUP_CONCURRENCY", group_concurrency as u64)?;

        let ssl_mode = match value(&reader, "DB_SSL_MODE") {
            Some(raw) => raw
                .parse::<SslMode>()
                .map_err(|e| ConfigError::InvalidValue("DB_SSL_MODE".into(), e.to_string()))?,
            None => SslMode::default(),
        };
        let connection = ConnectionSettings::new()
            .with_operation_timeout(parse_or(&reader, "DB_OPERATION_TIMEOUT_SECS", 30u64)?)
            .with_pool_size(parse_or(&reader, "DB_POOL_SIZE", 2u32)?);
        let database = DatabaseConfig::default()
            .with_default_database(
                value(&reader, "DB_DEFAULT_DATABASE").unwrap_or_else(|| "postgres".to_string()),
            )
            .with_ssl_mode(ssl_mode)
            .with_connection(connection)
            .with_deprovision(parse_flag(&reader, "SYNC_DEPROVISION", true)?);
        database.validate()?;

        let admin = Credentials::new(
            value(&reader, "DB_ADMIN_USER").unwrap_or_else(|| "postgres".to_string()),
            value(&reader, "DB_ADMIN_PASSWORD"),
        );
        let mut credentials = CredentialStore::new(admin);
        let mut keys: Vec<String> = keys
            .into_iter()
            .filter(|key| key.len() > CREDENTIALS_PREFIX.len())
            .filter(|key| key.starts_with(CREDENTIALS_PREFIX))
            .collect();
        keys.sort();
        for key in keys {
            let Some(raw) = value(&reader, &key) else {
                continue;
            };
            let entry = Credentials::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue(key.clone(), e.to_string()))?;
            credentials = credentials.with_entry(&key[CREDENTIALS_PREFIX.len()..], entry);
        }

        Ok(Self {
            registry_url,
            directory_url,
            http_timeout_secs,
            interval_secs,
            batch_size,
            group_concurrency,
            run_deadline_secs,
            dry_run,
            database,
            credentials,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            group_concurrency: self.group_concurrency,
            dry_run: self.dry_run,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size,
            run_deadline: self.run_deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error(transparent)]
    Invalid(#[from] SyncError),
}

/// Value of `key`, with blank values treated as unset.
fn value<F>(reader: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    reader(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn first_of<F>(reader: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    keys.iter().find_map(|key| value(reader, key))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string()))
}

fn parse_or<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value(reader, key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_flag<F>(reader: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let Some(raw) = value(reader, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            key.into(),
            format!("expected a boolean, got '{raw}'"),
        )),
    }
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.into(),
            "must be greater than zero".into(),
        ));
    }
    Ok(())
}
