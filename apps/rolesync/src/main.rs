//! rolesync - keeps PostgreSQL role membership in line with directory groups.
//!
//! Runs a reconciliation pass across every registered server at startup and
//! then on a fixed interval until Ctrl+C or SIGTERM. With `--once` it runs a
//! single pass and exits, returning non-zero when the run failed.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;

use rolesync_client::{DirectoryClient, RegistryClient};
use rolesync_engine::{
    FanOutRunner, ReconciliationScheduler, RunExecutor, RunTrigger, ServerReconciler,
};
use rolesync_postgres::PgRoleProvisioner;

mod config;
mod logging;

use config::DaemonConfig;

/// Directory to PostgreSQL role membership reconciler
#[derive(Parser)]
#[command(name = "rolesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run a single reconciliation pass and exit
    #[arg(long)]
    once: bool,

    /// Compute and report deltas without changing any database
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    logging::init_logging(logging::DEFAULT_FILTER);

    let mut config = DaemonConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });
    if cli.dry_run {
        config.dry_run = true;
    }

    info!(
        registry_url = %config.registry_url,
        directory_url = %config.directory_url,
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        group_concurrency = config.group_concurrency,
        dry_run = config.dry_run,
        deprovision = config.database.deprovision,
        credentials_entries = config.credentials.len(),
        "starting rolesync"
    );

    let registry = RegistryClient::new(&config.registry_url, config.http_timeout())
        .unwrap_or_else(|e| {
            eprintln!("Registry client error: {e}");
            std::process::exit(1);
        });
    let registry = Arc::new(registry);

    let directory = DirectoryClient::new(&config.directory_url, config.http_timeout())
        .unwrap_or_else(|e| {
            eprintln!("Directory client error: {e}");
            std::process::exit(1);
        });

    let provisioner = PgRoleProvisioner::new(config.database.clone(), config.credentials.clone())
        .unwrap_or_else(|e| {
            eprintln!("Provisioner error: {e}");
            std::process::exit(1);
        });
    let provisioner = Arc::new(provisioner);

    let reconciler = Arc::new(ServerReconciler::new(
        registry.clone(),
        Arc::new(directory),
        provisioner.clone(),
        config.reconciler_config(),
    ));
    let runner = Arc::new(FanOutRunner::new(
        registry,
        reconciler,
        config.runner_config(),
    ));

    let failed = if cli.once {
        let report = runner.run(RunTrigger::Manual).await;
        match serde_json::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize reconciliation report"),
        }
        report.is_failed()
    } else {
        let handle = ReconciliationScheduler::with_interval(runner, config.interval()).start();
        shutdown_signal().await;
        handle.stop().await;
        false
    };

    provisioner.close().await;
    info!("rolesync stopped");

    if failed {
        std::process::exit(1);
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
