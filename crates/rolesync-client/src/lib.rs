//! # rolesync client
//!
//! Read-only HTTP clients for the two remote collaborators of the
//! reconciliation engine:
//!
//! - [`DirectoryClient`] - authoritative group membership
//! - [`RegistryClient`] - managed servers, their groups and recorded membership
//!
//! Every failure (timeout, transport error, non-2xx status, body that does
//! not match the expected shape) is returned as an error. An empty
//! membership set is only ever returned when the remote side reported one.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use rolesync_client::DirectoryClient;
//! use rolesync_core::traits::DirectorySource;
//!
//! let directory = DirectoryClient::new("http://localhost:8080", Duration::from_secs(5))?;
//! let members = directory.fetch_members("dba").await?;
//! ```

pub mod directory;
pub mod http;
pub mod registry;

pub use directory::DirectoryClient;
pub use registry::RegistryClient;

pub(crate) const USER_AGENT: &str = concat!("rolesync/", env!("CARGO_PKG_VERSION"));
