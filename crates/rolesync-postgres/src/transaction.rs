//! Transaction wrapper for role operations.
//!
//! Every principal operation runs in its own transaction, with a local
//! `statement_timeout` and a transaction-scoped advisory lock. Dropping an
//! uncommitted transaction rolls it back.

use std::time::Duration;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use rolesync_core::error::{SyncError, SyncResult};

use crate::sql::advisory_lock_key;

/// A savepoint inside a [`RoleTransaction`].
#[derive(Debug)]
#[must_use]
pub struct Savepoint {
    name: String,
}

/// A transaction scoped to one role operation.
pub struct RoleTransaction {
    inner: Transaction<'static, Postgres>,
    savepoint_counter: u32,
}

impl RoleTransaction {
    /// Begin a transaction and bound each of its statements by `statement_timeout`.
    pub async fn begin(pool: &PgPool, statement_timeout: Duration) -> SyncResult<Self> {
        let mut inner = pool
            .begin()
            .await
            .map_err(|e| SyncError::database_with_source("failed to begin transaction", e))?;

        sqlx::query("SELECT pg_catalog.set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", statement_timeout.as_millis()))
            .execute(&mut *inner)
            .await
            .map_err(|e| SyncError::database_with_source("failed to set statement_timeout", e))?;

        Ok(Self {
            inner,
            savepoint_counter: 0,
        })
    }

    /// Connection to run statements on.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.inner
    }

    /// Take a transaction-scoped advisory lock on `(scope, name)`.
    ///
    /// Blocks until concurrent holders of the same key commit or roll back.
    pub async fn lock(&mut self, scope: &str, name: &str) -> SyncResult<()> {
        let key = advisory_lock_key(scope, name);
        sqlx::query("SELECT pg_catalog.pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.inner)
            .await
            .map_err(|e| {
                SyncError::database_with_source(format!("failed to lock {scope} '{name}'"), e)
            })?;
        debug!(scope, name, key, "Advisory lock acquired");
        Ok(())
    }

    /// Create a savepoint.
    pub async fn savepoint(&mut self) -> SyncResult<Savepoint> {
        self.savepoint_counter += 1;
        let name = format!("rolesync_sp_{}", self.savepoint_counter);

        sqlx::query(&format!("SAVEPOINT {name}"))
            .execute(&mut *self.inner)
            .await
            .map_err(|e| {
                SyncError::database_with_source(format!("failed to create savepoint {name}"), e)
            })?;

        Ok(Savepoint { name })
    }

    /// Release a savepoint, keeping its changes.
    pub async fn release(&mut self, savepoint: Savepoint) -> SyncResult<()> {
        sqlx::query(&format!("RELEASE SAVEPOINT {}", savepoint.name))
            .execute(&mut *self.inner)
            .await
            .map_err(|e| {
                SyncError::database_with_source(
                    format!("failed to release savepoint {}", savepoint.name),
                    e,
                )
            })?;
        Ok(())
    }

    /// Undo everything since the savepoint.
    pub async fn rollback_to(&mut self, savepoint: Savepoint) -> SyncResult<()> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name))
            .execute(&mut *self.inner)
            .await
            .map_err(|e| {
                SyncError::database_with_source(
                    format!("failed to roll back to savepoint {}", savepoint.name),
                    e,
                )
            })?;
        warn!(savepoint = %savepoint.name, "Rolled back to savepoint");
        Ok(())
    }

    /// Commit the transaction.
    pub async fn commit(self) -> SyncResult<()> {
        self.inner
            .commit()
            .await
            .map_err(|e| SyncError::database_with_source("failed to commit transaction", e))
    }
}
