//! Per-server reconciliation.
//!
//! For each group registered for a server: read the registry's recorded
//! membership, read the directory's membership, compute the delta and hand it
//! to the provisioner. Every group is independent; a group that cannot be
//! read is skipped for this cycle and never loses members because of it.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use rolesync_core::traits::{DirectorySource, RegistrySource, RoleProvisioner};
use rolesync_core::types::Server;

use crate::delta::compute_delta;
use crate::report::{GroupReport, ServerReport, SkipReason};

/// Server reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Groups reconciled concurrently on one server.
    pub group_concurrency: usize,

    /// Compute and report deltas without applying them.
    pub dry_run: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            group_concurrency: 4,
            dry_run: false,
        }
    }
}

/// Reconciles every group of one server.
pub struct ServerReconciler {
    registry: Arc<dyn RegistrySource>,
    directory: Arc<dyn DirectorySource>,
    provisioner: Arc<dyn RoleProvisioner>,
    config: ReconcilerConfig,
}

impl ServerReconciler {
    /// Create a reconciler.
    pub fn new(
        registry: Arc<dyn RegistrySource>,
        directory: Arc<dyn DirectorySource>,
        provisioner: Arc<dyn RoleProvisioner>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            provisioner,
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile one server.
    #[instrument(skip(self, server), fields(server = %server.name))]
    pub async fn reconcile(&self, server: &Server) -> ServerReport {
        let report = ServerReport::new(&server.name);

        if let Err(e) = self.provisioner.validate_server(server).await {
            warn!(error = %e, "Skipping server with invalid connection parameters");
            return report.skipped(&e);
        }

        let groups = match self.registry.list_groups(server).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "Failed to list groups");
                return report.failed(Some(e.kind()), e.to_string());
            }
        };

        debug!(count = groups.len(), "Reconciling groups");

        let groups: Vec<GroupReport> = stream::iter(groups)
            .map(|group| self.reconcile_group(server, group))
            .buffered(self.config.group_concurrency.max(1))
            .collect()
            .await;

        let report = report.completed(groups);
        info!(
            groups = report.groups.len(),
            "Server reconciliation finished"
        );
        report
    }

    #[instrument(skip(self, server), fields(server = %server.name))]
    async fn reconcile_group(&self, server: &Server, group: String) -> GroupReport {
        let state = match self.registry.fetch_group(server, &group).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Skipping group: registry unavailable");
                return GroupReport::skipped(group, SkipReason::RegistryUnavailable, Some(&e));
            }
        };

        if !state.group.processed {
            debug!("Skipping unprocessed group");
            return GroupReport::skipped(group, SkipReason::Unprocessed, None);
        }

        let target = match self.directory.fetch_members(&group).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "Skipping group: directory unavailable");
                return GroupReport::skipped(group, SkipReason::DirectoryUnavailable, Some(&e));
            }
        };

        let delta = compute_delta(&target, &state.members);

        if self.config.dry_run {
            info!(
                to_add = delta.to_add.len(),
                to_remove = delta.to_remove.len(),
                "Dry run: membership changes not applied"
            );
            return GroupReport::planned(group, delta);
        }

        match self.provisioner.apply(server, &state.group, &delta).await {
            Ok(outcome) => {
                if !outcome.is_clean() {
                    warn!(
                        failures = outcome.failures.len(),
                        "Some principal operations failed"
                    );
                }
                GroupReport::applied(group, delta, outcome)
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Failed to apply membership changes");
                GroupReport::failed(group, delta, &e)
            }
        }
    }
}
