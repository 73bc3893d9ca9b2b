//! Fan-out across servers.
//!
//! One task per server, at most `batch_size` in flight. A server that fails
//! never affects its siblings; only failing to list servers fails the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use rolesync_core::traits::RegistrySource;

use crate::reconciler::ServerReconciler;
use crate::report::{RunReport, RunTrigger, ServerReport};

/// Fan-out configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Servers reconciled concurrently.
    pub batch_size: usize,

    /// Servers not started within this time after the run began are abandoned.
    pub run_deadline: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            run_deadline: None,
        }
    }
}

/// Executes one reconciliation run.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    /// Run reconciliation across all servers.
    async fn run(&self, trigger: RunTrigger) -> RunReport;
}

/// Reconciles every registered server with bounded concurrency.
pub struct FanOutRunner {
    registry: Arc<dyn RegistrySource>,
    reconciler: Arc<ServerReconciler>,
    config: RunnerConfig,
}

impl FanOutRunner {
    /// Create a runner.
    pub fn new(
        registry: Arc<dyn RegistrySource>,
        reconciler: Arc<ServerReconciler>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            reconciler,
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

#[async_trait]
impl RunExecutor for FanOutRunner {
    #[instrument(skip(self))]
    async fn run(&self, trigger: RunTrigger) -> RunReport {
        let report = RunReport::new(trigger, self.reconciler.config().dry_run);
        let deadline = self.config.run_deadline.map(|d| Instant::now() + d);

        info!(run_id = %report.run_id, "Starting reconciliation run");

        let servers = match self.registry.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "Failed to list servers");
                return report.failed(&e);
            }
        };

        let batch_size = self.config.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let mut tasks: Vec<(String, JoinHandle<ServerReport>)> = Vec::with_capacity(servers.len());
        let mut not_started = Vec::new();

        let mut pending = servers.into_iter();
        while let Some(server) = pending.next() {
            let acquired = match deadline {
                Some(deadline) if Instant::now() >= deadline => None,
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned())
                        .await
                        .ok()
                }
                None => Some(semaphore.clone().acquire_owned().await),
            };
            let Some(permit) = acquired else {
                not_started.push(server.name);
                not_started.extend(pending.by_ref().map(|s| s.name));
                break;
            };
            let Ok(permit) = permit else {
                // The semaphore is never closed.
                not_started.push(server.name);
                continue;
            };

            let reconciler = self.reconciler.clone();
            let name = server.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit; // Hold permit until task completes
                reconciler.reconcile(&server).await
            });
            tasks.push((name, handle));
        }

        if !not_started.is_empty() {
            warn!(
                run_id = %report.run_id,
                count = not_started.len(),
                "Run deadline passed; servers not started"
            );
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (name, handle) in tasks {
            match handle.await {
                Ok(server_report) => results.push(server_report),
                Err(e) => {
                    error!(server = %name, error = %e, "Server reconciliation task failed");
                    results.push(
                        ServerReport::new(name).failed(None, format!("reconciliation task failed: {e}")),
                    );
                }
            }
        }

        let report = report.completed(results, not_started);
        info!(
            run_id = %report.run_id,
            duration_ms = report.duration_ms(),
            servers = report.summary.servers_attempted,
            not_started = report.summary.servers_not_started,
            groups_reconciled = report.summary.groups_reconciled,
            groups_skipped = report.summary.groups_skipped,
            principal_failures = report.summary.principal_failures,
            "Reconciliation run finished"
        );
        report
    }
}
