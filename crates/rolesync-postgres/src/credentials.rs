//! Credentials used to connect to managed servers.
//!
//! Servers either use the default administrator credentials or name an entry
//! by reference. References are matched case-insensitively and `-` is treated
//! like `_`, so a server referencing `vault-b` resolves the entry configured
//! as `DB_CREDENTIALS_VAULT_B`.

use std::collections::HashMap;

use rolesync_core::error::{SyncError, SyncResult};

/// A username and optional password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Parse `user:password` (or just `user`).
    pub fn parse(entry: &str) -> SyncResult<Self> {
        let (username, password) = match entry.split_once(':') {
            Some((user, password)) => (user.trim(), Some(password.to_string())),
            None => (entry.trim(), None),
        };
        if username.is_empty() {
            return Err(SyncError::invalid_configuration(
                "credentials entry has no username",
            ));
        }
        Ok(Self::new(username, password.filter(|p| !p.is_empty())))
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

/// Default credentials plus named entries.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    default: Credentials,
    named: HashMap<String, Credentials>,
}

impl CredentialStore {
    /// Create a store with only default credentials.
    #[must_use]
    pub fn new(default: Credentials) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Add a named entry.
    #[must_use]
    pub fn with_entry(mut self, reference: &str, credentials: Credentials) -> Self {
        self.named.insert(normalize(reference), credentials);
        self
    }

    /// Default credentials.
    #[must_use]
    pub fn default_credentials(&self) -> &Credentials {
        &self.default
    }

    /// Resolve a server's credentials reference.
    pub fn resolve(&self, reference: Option<&str>) -> SyncResult<&Credentials> {
        match reference.map(str::trim).filter(|r| !r.is_empty()) {
            None => Ok(&self.default),
            Some(reference) => {
                self.named
                    .get(&normalize(reference))
                    .ok_or_else(|| SyncError::UnknownCredentials {
                        reference: reference.to_string(),
                    })
            }
        }
    }

    /// Number of named entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.named.len()
    }

    /// Whether there are no named entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

fn normalize(reference: &str) -> String {
    reference.trim().to_ascii_uppercase().replace('-', "_")
}
