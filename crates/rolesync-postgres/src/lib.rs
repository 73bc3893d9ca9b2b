//! # rolesync postgres
//!
//! PostgreSQL implementation of [`RoleProvisioner`](rolesync_core::traits::RoleProvisioner).
//!
//! ## Features
//!
//! - Group roles created `NOLOGIN`, principals created `LOGIN` with a
//!   SCRAM-SHA-256 verifier of a random password
//! - One transaction per principal, serialized by `pg_advisory_xact_lock`
//! - Principals without any remaining group are reassigned, stripped and
//!   dropped (superusers, the connecting user and the database owner never are)
//! - Lazily created connection pools, one per server
//!
//! ## Example
//!
//! ```ignore
//! use rolesync_postgres::{CredentialStore, Credentials, DatabaseConfig, PgRoleProvisioner};
//!
//! let credentials = CredentialStore::new(Credentials::new("postgres", Some(password)));
//! let provisioner = PgRoleProvisioner::new(DatabaseConfig::default(), credentials)?;
//! let outcome = provisioner.apply(&server, &group, &delta).await?;
//! provisioner.close().await;
//! ```

pub mod config;
pub mod credentials;
pub mod password;
pub mod provisioner;
pub mod sql;
pub mod transaction;

pub use config::{ConnectTarget, DatabaseConfig, SslMode};
pub use credentials::{CredentialStore, Credentials};
pub use provisioner::PgRoleProvisioner;
