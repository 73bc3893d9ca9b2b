//! # rolesync engine
//!
//! Reconciles PostgreSQL role membership with the directory.
//!
//! ## Architecture
//!
//! ```text
//! ReconciliationScheduler ──► FanOutRunner ──► ServerReconciler (one per server)
//!        (ticks, triggers)     (batch_size)        │
//!                                                  ├─ RegistrySource::fetch_group
//!                                                  ├─ DirectorySource::fetch_members
//!                                                  ├─ compute_delta
//!                                                  └─ RoleProvisioner::apply
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rolesync_engine::{FanOutRunner, ReconciliationScheduler, ServerReconciler};
//!
//! let reconciler = Arc::new(ServerReconciler::new(registry.clone(), directory, provisioner, Default::default()));
//! let runner = Arc::new(FanOutRunner::new(registry, reconciler, Default::default()));
//! let handle = ReconciliationScheduler::with_interval(runner, Duration::from_secs(60)).start();
//!
//! handle.trigger();
//! handle.stop().await;
//! ```

pub mod delta;
pub mod reconciler;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod statistics;

pub use delta::compute_delta;
pub use reconciler::{ReconcilerConfig, ServerReconciler};
pub use report::{
    GroupReport, GroupStatus, RunReport, RunStatus, RunTrigger, ServerReport, ServerStatus,
    SkipReason,
};
pub use runner::{FanOutRunner, RunExecutor, RunnerConfig};
pub use scheduler::{
    IntervalTicker, ReconciliationScheduler, SchedulerHandle, SchedulerStats, Ticker,
};
pub use statistics::RunSummary;
