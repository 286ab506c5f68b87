//! Interval-driven crawl scheduling

use std::sync::Arc;
use std::time::Duration;

use oc_config::CrawlConfig;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::cycle::{CrawlCycle, CycleReport};
use crate::Result;

/// Runs a [`CrawlCycle`] every interval, optionally once at start-up.
///
/// Cycles never overlap: a tick that lands while a cycle is still running is skipped.
/// [`stop`](Self::stop) wakes the loop at once, interrupting a cycle in progress.
pub struct CrawlScheduler {
    cycle: Arc<CrawlCycle>,
    config: CrawlConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_report: Arc<Mutex<Option<CycleReport>>>,
}

impl CrawlScheduler {
    pub fn new(cycle: Arc<CrawlCycle>, config: CrawlConfig) -> Self {
        Self {
            cycle,
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Crawl scheduler is disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("Crawl scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        let period = self.config.interval().max(Duration::from_secs(1));
        info!(
            interval_secs = period.as_secs(),
            run_on_start = self.config.run_on_start,
            "Starting crawl scheduler"
        );

        let first_tick = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let cycle = self.cycle.clone();
        let running_clone = self.running.clone();
        let shutdown = self.shutdown.clone();
        let last_report = self.last_report.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(first_tick, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.notified() => break,
                }
                if !*running_clone.read().await {
                    break;
                }
                tokio::select! {
                    _ = run_and_record(&cycle, &last_report) => {}
                    _ = shutdown.notified() => {
                        warn!("Crawl cycle interrupted by shutdown");
                        break;
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        self.shutdown.notify_one();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Crawl scheduler task failed");
            }
        }
        info!("Crawl scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run one cycle now, outside the schedule
    pub async fn run_now(&self) -> Result<CycleReport> {
        let report = self.cycle.run().await?;
        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Report of the most recent successful cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.lock().clone()
    }
}

async fn run_and_record(cycle: &CrawlCycle, last_report: &Mutex<Option<CycleReport>>) {
    match cycle.run().await {
        Ok(report) => {
            if !report.dispatch.is_complete() {
                warn!(
                    cycle_id = %report.cycle_id,
                    failed_ids = ?report.dispatch.failed_ids(),
                    "Some entries were not dispatched and will be picked up next cycle"
                );
            }
            *last_report.lock() = Some(report);
        }
        Err(e) if e.is_authorization() => {
            error!(error = %e, "Crawl cycle aborted: credential exchange refused");
        }
        Err(e) => {
            error!(error = %e, "Crawl cycle failed");
        }
    }
}
