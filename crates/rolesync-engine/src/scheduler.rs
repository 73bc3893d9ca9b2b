//! Periodic reconciliation.
//!
//! The scheduler runs once immediately, then on every tick of its [`Ticker`],
//! and whenever [`SchedulerHandle::trigger`] is called. Runs never overlap: a
//! trigger that fires while a run is in flight is skipped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::report::{RunReport, RunTrigger};
use crate::runner::RunExecutor;

/// Source of periodic ticks.
#[async_trait]
pub trait Ticker: Send + 'static {
    /// Wait for the next tick.
    async fn tick(&mut self);
}

/// Ticker backed by a tokio interval. The first tick comes one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Create a ticker firing every `period`. Missed ticks are skipped.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Counters shared between the scheduler task and its handle.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    runs_started: AtomicU64,
    triggers_skipped: AtomicU64,
}

impl SchedulerStats {
    /// Runs started so far.
    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::SeqCst)
    }

    /// Triggers skipped because a run was in flight.
    pub fn triggers_skipped(&self) -> u64 {
        self.triggers_skipped.load(Ordering::SeqCst)
    }
}

/// Drives a [`RunExecutor`] on a schedule.
pub struct ReconciliationScheduler {
    executor: Arc<dyn RunExecutor>,
    ticker: Box<dyn Ticker>,
}

impl ReconciliationScheduler {
    /// Create a scheduler.
    pub fn new(executor: Arc<dyn RunExecutor>, ticker: Box<dyn Ticker>) -> Self {
        Self { executor, ticker }
    }

    /// Create a scheduler that ticks every `period`.
    pub fn with_interval(executor: Arc<dyn RunExecutor>, period: Duration) -> Self {
        Self::new(executor, Box::new(IntervalTicker::new(period)))
    }

    /// Start the scheduling loop. The first run starts immediately.
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (report_tx, report_rx) = watch::channel(None);
        let stats = Arc::new(SchedulerStats::default());

        let clock = SchedulerLoop {
            executor: self.executor,
            ticker: self.ticker,
            cancel: cancel.clone(),
            triggers: trigger_rx,
            reports: Arc::new(report_tx),
            stats: stats.clone(),
            in_flight: None,
        };
        let task = tokio::spawn(clock.run());

        SchedulerHandle {
            cancel,
            trigger_tx,
            report_rx,
            stats,
            task,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    trigger_tx: mpsc::Sender<()>,
    report_rx: watch::Receiver<Option<RunReport>>,
    stats: Arc<SchedulerStats>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a run now.
    ///
    /// Returns `false` if a request is already pending. A request that
    /// arrives while a run is in flight is skipped like a tick.
    pub fn trigger(&self) -> bool {
        self.trigger_tx.try_send(()).is_ok()
    }

    /// Watch the report of the latest finished run.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<RunReport>> {
        self.report_rx.clone()
    }

    /// Scheduler counters.
    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Stop the clock and wait for the in-flight run to finish.
    pub async fn stop(self) {
        info!("Stopping reconciliation scheduler");
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task failed");
        }
        info!("Reconciliation scheduler stopped");
    }
}

struct SchedulerLoop {
    executor: Arc<dyn RunExecutor>,
    ticker: Box<dyn Ticker>,
    cancel: CancellationToken,
    triggers: mpsc::Receiver<()>,
    reports: Arc<watch::Sender<Option<RunReport>>>,
    stats: Arc<SchedulerStats>,
    in_flight: Option<JoinHandle<()>>,
}

impl SchedulerLoop {
    async fn run(mut self) {
        info!("Reconciliation scheduler started");
        self.dispatch(RunTrigger::Startup);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.ticker.tick() => self.dispatch(RunTrigger::Interval),
                Some(()) = self.triggers.recv() => self.dispatch(RunTrigger::Manual),
            }
        }

        if let Some(run) = self.in_flight.take() {
            info!("Waiting for in-flight run to complete...");
            if let Err(e) = run.await {
                error!(error = %e, "Reconciliation run task failed");
            }
        }
    }

    fn dispatch(&mut self, trigger: RunTrigger) {
        if self.in_flight.as_ref().is_some_and(|run| !run.is_finished()) {
            self.stats.triggers_skipped.fetch_add(1, Ordering::SeqCst);
            warn!(%trigger, "Reconciliation run still in progress; skipping trigger");
            return;
        }

        self.stats.runs_started.fetch_add(1, Ordering::SeqCst);
        let executor = self.executor.clone();
        let reports = self.reports.clone();

        self.in_flight = Some(tokio::spawn(async move {
            let report = executor.run(trigger).await;
            match serde_json::to_string(&report) {
                Ok(json) => info!(report = %json, "Reconciliation report"),
                Err(e) => warn!(error = %e, "Failed to serialize reconciliation report"),
            }
            reports.send_replace(Some(report));
        }));
    }
}
