//! Queue-driven loop around [`CacheWriter`]

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oc_common::logging::unit_span;
use oc_common::QueuedWorkUnit;
use oc_config::WriterConfig;
use oc_queue::{QueueConsumer, QueueMetrics};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use crate::writer::CacheWriter;
use crate::{Result, SyncError};

/// What one poll round did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub received: usize,
    pub written: usize,
    pub failed: usize,
}

pub struct WriterWorker {
    consumer: Arc<dyn QueueConsumer>,
    writer: Arc<CacheWriter>,
    config: WriterConfig,
    written_total: AtomicU64,
    failed_total: AtomicU64,
}

impl WriterWorker {
    pub fn new(consumer: Arc<dyn QueueConsumer>, writer: Arc<CacheWriter>, config: WriterConfig) -> Self {
        Self {
            consumer,
            writer,
            config,
            written_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        }
    }

    /// Poll until a shutdown signal arrives
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            queue = %self.consumer.identifier(),
            batch_size = self.config.batch_size,
            "Writer worker started"
        );
        let idle = Duration::from_millis(self.config.idle_backoff_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(queue = %self.consumer.identifier(), "Writer worker shutting down");
                    break;
                }
                result = self.poll_once() => {
                    match result {
                        Ok(outcome) if outcome.received > 0 => {}
                        Ok(_) => tokio::time::sleep(idle).await,
                        Err(e) => {
                            error!(error = %e, queue = %self.consumer.identifier(), "Error polling");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        self.consumer.stop().await;
    }

    /// Receive up to one batch and process each unit in turn
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let units = self.consumer.poll(self.config.batch_size.max(1)).await?;
        let mut outcome = PollOutcome {
            received: units.len(),
            ..Default::default()
        };

        for queued in units {
            if self.handle(queued).await {
                outcome.written += 1;
            } else {
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }

    async fn handle(&self, queued: QueuedWorkUnit) -> bool {
        let span = unit_span(&queued.unit.id, queued.unit.cycle_id.as_deref());

        async {
            let budget = self.config.timeout();
            let write = tokio::time::timeout(budget, self.writer.process(&queued.unit));
            let result = match self.with_heartbeat(&queued.receipt_handle, write).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout {
                    operation: format!("write of {}", queued.unit.id),
                    budget,
                }),
            };

            match result {
                Ok(_) => {
                    if let Err(e) = self.consumer.ack(&queued.receipt_handle).await {
                        // The upsert stands; a redelivery just rewrites the same record
                        warn!(error = %e, "Failed to ack written unit");
                    }
                    self.written_total.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("orgcache.writer.upserted_total").increment(1);
                    debug!("Work unit written");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Work unit failed, leaving it for redelivery");
                    if let Err(nack_err) = self
                        .consumer
                        .nack(&queued.receipt_handle, Some(self.config.redelivery_delay_seconds))
                        .await
                    {
                        warn!(error = %nack_err, "Failed to nack unit, visibility timeout will apply");
                    }
                    self.failed_total.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("orgcache.writer.failed_total").increment(1);
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Drive `work` to completion, extending the unit's visibility on every heartbeat so a slow
    /// write is not redelivered to another worker mid-flight.
    async fn with_heartbeat<F: Future>(&self, receipt_handle: &str, work: F) -> F::Output {
        let Some(period) = self.config.heartbeat_interval() else {
            return work.await;
        };
        let extension = self.config.visibility_extension_seconds;

        tokio::pin!(work);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = heartbeat.tick() => {
                    match self.consumer.extend_visibility(receipt_handle, extension).await {
                        Ok(()) => debug!(extension_secs = extension, "Extended visibility of in-progress unit"),
                        Err(e) => warn!(error = %e, "Failed to extend visibility of in-progress unit"),
                    }
                }
            }
        }
    }

    /// Queue depth as the backend reports it; `None` when unavailable
    pub async fn queue_metrics(&self) -> Option<QueueMetrics> {
        match self.consumer.get_metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, queue = %self.consumer.identifier(), "Failed to read queue metrics");
                None
            }
        }
    }

    pub fn written_total(&self) -> u64 {
        self.written_total.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.consumer.is_healthy() && self.writer.store().is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_cache::{CacheStore, MemoryCacheStore};
    use oc_common::WorkUnit;
    use oc_queue::{MemoryQueue, QueuePublisher};
    use oc_source::mock::{MockConnector, MockCredentialBroker, MockDirectory, MockOperation};
    use oc_source::RetryPolicy;

    struct Fixture {
        directory: Arc<MockDirectory>,
        queue: Arc<MemoryQueue>,
        store: Arc<MemoryCacheStore>,
        worker: Arc<WriterWorker>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MockDirectory::new());
        directory.add_root("r-1");
        directory.add_entry("111", "r-1");
        directory.add_entry("222", "r-1");

        let queue = Arc::new(MemoryQueue::new("units", 30));
        let store = Arc::new(MemoryCacheStore::new());
        let writer = Arc::new(CacheWriter::new(
            Arc::new(MockCredentialBroker::new()),
            Arc::new(MockConnector::new(directory.clone())),
            store.clone(),
            RetryPolicy::none(),
        ));
        let config = WriterConfig {
            batch_size: 10,
            idle_backoff_ms: 10,
            ..Default::default()
        };
        let worker = Arc::new(WriterWorker::new(queue.clone(), writer, config));
        Fixture { directory, queue, store, worker }
    }

    #[tokio::test]
    async fn test_written_units_are_acked() {
        let f = fixture();
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();
        f.queue.publish(WorkUnit::new("c1", "222")).await.unwrap();

        let outcome = f.worker.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome { received: 2, written: 2, failed: 0 });
        assert!(f.queue.is_empty());
        assert_eq!(f.store.count().await.unwrap(), 2);
        assert_eq!(f.worker.written_total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_unit_is_redelivered_after_delay() {
        let f = fixture();
        f.directory.fail_transiently(MockOperation::DescribeEntry, 1);
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();

        let outcome = f.worker.poll_once().await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.store.count().await.unwrap(), 0);

        // Hidden for the redelivery delay, then retried successfully
        assert_eq!(f.worker.poll_once().await.unwrap().received, 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        let outcome = f.worker.poll_once().await.unwrap();
        assert_eq!(outcome.written, 1);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entry_fails_only_that_unit() {
        let f = fixture();
        f.queue.publish(WorkUnit::new("c1", "missing")).await.unwrap();
        f.queue.publish(WorkUnit::new("c1", "222")).await.unwrap();

        let outcome = f.worker.poll_once().await.unwrap();
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.failed, 1);
        assert!(f.store.get("222").await.unwrap().is_some());
    }

    fn slow_worker(f: &Fixture, visibility_extension_seconds: u32) -> Arc<WriterWorker> {
        f.directory.set_latency(Duration::from_secs(40));
        let writer = Arc::new(CacheWriter::new(
            Arc::new(MockCredentialBroker::new()),
            Arc::new(MockConnector::new(f.directory.clone())),
            f.store.clone(),
            RetryPolicy::none(),
        ));
        let config = WriterConfig {
            timeout_seconds: 600,
            visibility_extension_seconds,
            ..Default::default()
        };
        Arc::new(WriterWorker::new(f.queue.clone(), writer, config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_keeps_unit_hidden() {
        let f = fixture();
        let worker = slow_worker(&f, 30);
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();

        let handle = tokio::spawn(async move { worker.poll_once().await });

        // Past the 30s visibility window, but heartbeats have pushed it out
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(f.queue.poll(10).await.unwrap().is_empty());

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.written, 1);
        assert!(f.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_heartbeat_slow_write_is_redelivered() {
        let f = fixture();
        let worker = slow_worker(&f, 0);
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();

        let handle = tokio::spawn(async move { worker.poll_once().await });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(f.queue.poll(10).await.unwrap().len(), 1);

        // The write still lands; only its ack is stale
        assert_eq!(handle.await.unwrap().unwrap().written, 1);
        assert_eq!(f.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_metrics_report_depth() {
        let f = fixture();
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();
        f.queue.publish(WorkUnit::new("c1", "222")).await.unwrap();

        let metrics = f.worker.queue_metrics().await.unwrap();
        assert_eq!(metrics.pending_messages, 2);
        assert_eq!(metrics.in_flight_messages, 0);

        f.worker.poll_once().await.unwrap();
        let metrics = f.worker.queue_metrics().await.unwrap();
        assert_eq!(metrics.pending_messages, 0);
        assert_eq!(metrics.total_acked, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        f.queue.publish(WorkUnit::new("c1", "111")).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(f.worker.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(f.store.count().await.unwrap(), 1);
        assert!(!f.queue.is_healthy());
    }
}
