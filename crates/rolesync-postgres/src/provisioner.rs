//! PostgreSQL role provisioner.
//!
//! Applies membership deltas to a server's role system. A group maps to a
//! `NOLOGIN` role of the same name; its members are `LOGIN` roles granted
//! that group role.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use rolesync_core::error::{SyncError, SyncResult};
use rolesync_core::traits::RoleProvisioner;
use rolesync_core::types::{ApplyOutcome, Group, MembershipDelta, PrincipalAction, Server};

use crate::config::{ConnectTarget, DatabaseConfig};
use crate::credentials::CredentialStore;
use crate::password;
use crate::sql::{is_duplicate_object, quote_identifier, quote_literal, validate_identifier};
use crate::transaction::RoleTransaction;

const ROLE_LOCK: &str = "role";
const PRINCIPAL_LOCK: &str = "principal";

const ROLE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1)";

const MEMBERSHIP_EXISTS: &str = "SELECT EXISTS (
    SELECT 1
    FROM pg_catalog.pg_auth_members m
    JOIN pg_catalog.pg_roles r ON r.oid = m.roleid
    JOIN pg_catalog.pg_roles u ON u.oid = m.member
    WHERE r.rolname = $1 AND u.rolname = $2
)";

const REMAINING_MEMBERSHIPS: &str = "SELECT COUNT(*)
    FROM pg_catalog.pg_auth_members m
    JOIN pg_catalog.pg_roles u ON u.oid = m.member
    WHERE u.rolname = $1";

// A non-superuser CREATEROLE admin is implicitly granted every role it
// creates (PostgreSQL 16+); that grant does not count as a member.
const PRINCIPAL_PROTECTION: &str = "SELECT
    r.rolsuper,
    EXISTS (
        SELECT 1
        FROM pg_catalog.pg_auth_members m
        JOIN pg_catalog.pg_roles u ON u.oid = m.member
        WHERE m.roleid = r.oid AND u.rolname <> session_user
    ),
    r.rolname = session_user,
    r.rolname = (
        SELECT pg_catalog.pg_get_userbyid(d.datdba)
        FROM pg_catalog.pg_database d
        WHERE d.datname = pg_catalog.current_database()
    )
    FROM pg_catalog.pg_roles r
    WHERE r.rolname = $1";

const DATABASE_OWNER: &str = "SELECT pg_catalog.pg_get_userbyid(d.datdba)::text
    FROM pg_catalog.pg_database d
    WHERE d.datname = pg_catalog.current_database()";

#[derive(Debug, Default)]
struct AddResult {
    created: bool,
    granted: bool,
}

#[derive(Debug, Default)]
struct RemoveResult {
    revoked: bool,
    deprovisioned: bool,
    retained: bool,
    deprovision_error: Option<SyncError>,
}

/// Role provisioner for PostgreSQL servers.
///
/// Connection pools are created on first use per (user, host, port,
/// database) and cached until [`PgRoleProvisioner::close`].
pub struct PgRoleProvisioner {
    config: DatabaseConfig,
    credentials: CredentialStore,
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
    disposed: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for PgRoleProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRoleProvisioner")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl PgRoleProvisioner {
    /// Create a provisioner.
    pub fn new(config: DatabaseConfig, credentials: CredentialStore) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            credentials,
            pools: Arc::new(RwLock::new(HashMap::new())),
            disposed: Arc::new(RwLock::new(false)),
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Resolve a server's endpoint, database and credentials.
    pub fn resolve_target(&self, server: &Server) -> SyncResult<ConnectTarget> {
        let (host, port) = server.endpoint()?;
        let database = server
            .database
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.config.default_database)
            .to_string();
        let credentials = self.credentials.resolve(server.credentials.as_deref())?;

        Ok(ConnectTarget::new(
            host,
            port.unwrap_or(self.config.default_port),
            database,
            credentials.username.clone(),
            credentials.password().map(str::to_string),
            &self.config,
        ))
    }

    /// Close every cached pool. Later calls to `apply` fail.
    pub async fn close(&self) {
        *self.disposed.write().await = true;

        let pools: Vec<PgPool> = self.pools.write().await.drain().map(|(_, p)| p).collect();
        for pool in &pools {
            pool.close().await;
        }

        info!(pools = pools.len(), "Role provisioner closed");
    }

    async fn get_pool(&self, target: &ConnectTarget) -> SyncResult<PgPool> {
        if *self.disposed.read().await {
            return Err(SyncError::database("role provisioner has been closed"));
        }

        let key = target.pool_key();
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&key) {
                return Ok(pool.clone());
            }
        }

        let pool = self.create_pool(target).await?;

        // A concurrent caller may have won the race; keep the first pool.
        let mut pools = self.pools.write().await;
        let pool = pools.entry(key).or_insert(pool).clone();
        Ok(pool)
    }

    async fn create_pool(&self, target: &ConnectTarget) -> SyncResult<PgPool> {
        debug!(host = %target.host, port = target.port, database = %target.database, "Creating database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(self.config.connection.pool_size)
            .acquire_timeout(self.config.connection.connection_timeout())
            .connect_with(target.connect_options())
            .await
            .map_err(|e| {
                SyncError::database_with_source(
                    format!(
                        "failed to connect to {}:{}/{}",
                        target.host, target.port, target.database
                    ),
                    e,
                )
            })?;

        info!(host = %target.host, port = target.port, database = %target.database, "Database connection pool established");
        Ok(pool)
    }

    /// Bound an operation by the configured operation timeout.
    ///
    /// On expiry the operation's future is dropped, which rolls back its
    /// transaction.
    async fn bounded<T>(&self, operation: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        match tokio::time::timeout(self.config.connection.operation_timeout(), operation).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::OperationTimeout {
                timeout_secs: self.config.connection.operation_timeout_secs,
            }),
        }
    }

    async fn ensure_group_role(&self, pool: &PgPool, group: &Group) -> SyncResult<()> {
        let role = quote_identifier(&group.name)?;

        let mut tx = RoleTransaction::begin(pool, self.config.connection.operation_timeout()).await?;
        tx.lock(ROLE_LOCK, &group.name).await?;

        if !role_exists(tx.conn(), &group.name).await? {
            let savepoint = tx.savepoint().await?;
            let created = sqlx::query(&format!("CREATE ROLE {role} NOLOGIN"))
                .execute(tx.conn())
                .await;
            match created {
                Ok(_) => {
                    tx.release(savepoint).await?;
                    info!(role = %group.name, "Created group role");
                }
                Err(e) if is_duplicate_object(&e) => {
                    tx.rollback_to(savepoint).await?;
                    debug!(role = %group.name, "Group role created concurrently");
                }
                Err(e) => {
                    return Err(SyncError::provisioning_with_source(
                        &group.name,
                        "failed to create group role",
                        e,
                    ))
                }
            }
        }

        for conferred in &group.roles {
            if conferred == &group.name {
                continue;
            }
            let quoted = match quote_identifier(conferred) {
                Ok(quoted) => quoted,
                Err(e) => {
                    warn!(role = %conferred, error = %e, "Skipping invalid conferred role");
                    continue;
                }
            };
            if !role_exists(tx.conn(), conferred).await? {
                warn!(role = %conferred, group = %group.name, "Conferred role does not exist on server");
                continue;
            }
            if !is_member(tx.conn(), conferred, &group.name).await? {
                sqlx::query(&format!("GRANT {quoted} TO {role}"))
                    .execute(tx.conn())
                    .await
                    .map_err(|e| {
                        SyncError::provisioning_with_source(
                            &group.name,
                            format!("failed to grant conferred role '{conferred}'"),
                            e,
                        )
                    })?;
                info!(role = %conferred, group = %group.name, "Granted conferred role");
            }
        }

        tx.commit().await
    }

    async fn add_principal(&self, pool: &PgPool, group: &str, principal: &str) -> SyncResult<AddResult> {
        let role = quote_identifier(group)?;
        let member = quote_identifier(principal)?;

        let mut tx = RoleTransaction::begin(pool, self.config.connection.operation_timeout()).await?;
        tx.lock(PRINCIPAL_LOCK, principal).await?;

        let mut result = AddResult::default();

        if !role_exists(tx.conn(), principal).await? {
            let verifier = password::random_verifier()?;
            sqlx::query(&format!(
                "CREATE ROLE {member} LOGIN PASSWORD {}",
                quote_literal(&verifier)
            ))
            .execute(tx.conn())
            .await
            .map_err(|e| {
                SyncError::provisioning_with_source(principal, "failed to create principal", e)
            })?;
            result.created = true;
        }

        if !is_member(tx.conn(), group, principal).await? {
            sqlx::query(&format!("GRANT {role} TO {member}"))
                .execute(tx.conn())
                .await
                .map_err(|e| {
                    SyncError::provisioning_with_source(principal, "failed to grant group role", e)
                })?;
            result.granted = true;
        }

        tx.commit().await?;
        Ok(result)
    }

    async fn remove_principal(
        &self,
        pool: &PgPool,
        group: &str,
        principal: &str,
    ) -> SyncResult<RemoveResult> {
        let role = quote_identifier(group)?;
        let member = quote_identifier(principal)?;

        let mut tx = RoleTransaction::begin(pool, self.config.connection.operation_timeout()).await?;
        tx.lock(PRINCIPAL_LOCK, principal).await?;

        let mut result = RemoveResult::default();

        if !role_exists(tx.conn(), principal).await? {
            // Already gone, e.g. dropped by a concurrent run.
            tx.commit().await?;
            return Ok(result);
        }

        if is_member(tx.conn(), group, principal).await? {
            sqlx::query(&format!("REVOKE {role} FROM {member}"))
                .execute(tx.conn())
                .await
                .map_err(|e| {
                    SyncError::provisioning_with_source(principal, "failed to revoke group role", e)
                })?;
            result.revoked = true;
        }

        if self.config.deprovision && remaining_memberships(tx.conn(), principal).await? == 0 {
            match protection_reason(tx.conn(), principal).await? {
                Some(reason) => {
                    info!(principal, reason, "Keeping protected principal without groups");
                    result.retained = true;
                }
                None => {
                    let savepoint = tx.savepoint().await?;
                    let dropped = drop_principal(tx.conn(), principal, &member).await;
                    match dropped {
                        Ok(()) => {
                            tx.release(savepoint).await?;
                            result.deprovisioned = true;
                        }
                        Err(e) => {
                            tx.rollback_to(savepoint).await?;
                            result.deprovision_error = Some(e);
                        }
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }
}

#[async_trait]
impl RoleProvisioner for PgRoleProvisioner {
    #[instrument(skip(self, server), fields(server = %server.name))]
    async fn validate_server(&self, server: &Server) -> SyncResult<()> {
        let target = self.resolve_target(server)?;
        validate_identifier(&target.username)?;
        debug!(host = %target.host, port = target.port, database = %target.database, "Server connection parameters valid");
        Ok(())
    }

    #[instrument(
        skip(self, server, group, delta),
        fields(server = %server.name, group = %group.name, add = delta.to_add.len(), remove = delta.to_remove.len())
    )]
    async fn apply(
        &self,
        server: &Server,
        group: &Group,
        delta: &MembershipDelta,
    ) -> SyncResult<ApplyOutcome> {
        let target = self.resolve_target(server)?;
        validate_identifier(&group.name)?;
        let pool = self.get_pool(&target).await?;

        self.bounded(self.ensure_group_role(&pool, group)).await?;

        let mut outcome = ApplyOutcome::default();

        for principal in &delta.to_add {
            match self
                .bounded(self.add_principal(&pool, &group.name, principal))
                .await
            {
                Ok(added) => {
                    if added.created {
                        outcome.created.push(principal.clone());
                    }
                    if added.granted {
                        outcome.granted.push(principal.clone());
                    }
                }
                Err(e) => {
                    warn!(principal = %principal, error = %e, transient = e.is_transient(), "Failed to add principal");
                    outcome.fail(principal, PrincipalAction::Add, &e);
                }
            }
        }

        for principal in &delta.to_remove {
            match self
                .bounded(self.remove_principal(&pool, &group.name, principal))
                .await
            {
                Ok(removed) => {
                    if removed.revoked {
                        outcome.revoked.push(principal.clone());
                    }
                    if removed.deprovisioned {
                        outcome.deprovisioned.push(principal.clone());
                    }
                    if removed.retained {
                        outcome.retained.push(principal.clone());
                    }
                    if let Some(e) = removed.deprovision_error {
                        warn!(principal = %principal, error = %e, transient = e.is_transient(), "Failed to drop principal");
                        outcome.fail(principal, PrincipalAction::Deprovision, &e);
                    }
                }
                Err(e) => {
                    warn!(principal = %principal, error = %e, transient = e.is_transient(), "Failed to remove principal");
                    outcome.fail(principal, PrincipalAction::Remove, &e);
                }
            }
        }

        info!(
            created = outcome.created.len(),
            granted = outcome.granted.len(),
            revoked = outcome.revoked.len(),
            deprovisioned = outcome.deprovisioned.len(),
            retained = outcome.retained.len(),
            failures = outcome.failures.len(),
            "Applied membership delta"
        );

        Ok(outcome)
    }
}

async fn role_exists(conn: &mut PgConnection, name: &str) -> SyncResult<bool> {
    sqlx::query_scalar::<_, bool>(ROLE_EXISTS)
        .bind(name)
        .fetch_one(conn)
        .await
        .map_err(|e| SyncError::database_with_source(format!("failed to look up role '{name}'"), e))
}

async fn is_member(conn: &mut PgConnection, role: &str, member: &str) -> SyncResult<bool> {
    sqlx::query_scalar::<_, bool>(MEMBERSHIP_EXISTS)
        .bind(role)
        .bind(member)
        .fetch_one(conn)
        .await
        .map_err(|e| {
            SyncError::database_with_source(
                format!("failed to check membership of '{member}' in '{role}'"),
                e,
            )
        })
}

async fn remaining_memberships(conn: &mut PgConnection, principal: &str) -> SyncResult<i64> {
    sqlx::query_scalar::<_, i64>(REMAINING_MEMBERSHIPS)
        .bind(principal)
        .fetch_one(conn)
        .await
        .map_err(|e| {
            SyncError::database_with_source(
                format!("failed to count memberships of '{principal}'"),
                e,
            )
        })
}

/// Why a principal must not be dropped, if it must not.
async fn protection_reason(
    conn: &mut PgConnection,
    principal: &str,
) -> SyncResult<Option<&'static str>> {
    let row = sqlx::query_as::<_, (bool, bool, bool, Option<bool>)>(PRINCIPAL_PROTECTION)
        .bind(principal)
        .fetch_optional(conn)
        .await
        .map_err(|e| {
            SyncError::database_with_source(format!("failed to inspect role '{principal}'"), e)
        })?;

    Ok(match row {
        None => Some("absent"),
        Some((true, _, _, _)) => Some("superuser"),
        Some((_, true, _, _)) => Some("has members"),
        Some((_, _, true, _)) => Some("connecting user"),
        Some((_, _, _, Some(true))) => Some("database owner"),
        Some(_) => None,
    })
}

/// Reassign owned objects to the database owner, drop remaining privileges, drop the role.
async fn drop_principal(conn: &mut PgConnection, principal: &str, member: &str) -> SyncResult<()> {
    let owner: String = sqlx::query_scalar(DATABASE_OWNER)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| SyncError::database_with_source("failed to look up database owner", e))?;
    let owner = quote_identifier(&owner)?;

    for statement in [
        format!("REASSIGN OWNED BY {member} TO {owner}"),
        format!("DROP OWNED BY {member}"),
        format!("DROP ROLE {member}"),
    ] {
        sqlx::query(&statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                SyncError::provisioning_with_source(principal, "failed to drop principal", e)
            })?;
    }

    info!(principal, "Dropped principal without groups");
    Ok(())
}
