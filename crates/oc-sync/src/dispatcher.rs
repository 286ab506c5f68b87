//! Fan-out of crawled entry ids onto the work queue

use std::sync::Arc;

use futures::{Stream, StreamExt};
use oc_common::WorkUnit;
use oc_config::MAX_DISPATCH_BATCH_SIZE;
use oc_queue::QueuePublisher;
use oc_source::SourceError;
use tracing::{debug, info, warn};

/// An id the queue did not take this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDispatch {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub enqueued: usize,
    pub failed: Vec<FailedDispatch>,
}

impl DispatchReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends one work unit per entry id, grouped into queue batches.
///
/// Ids the queue rejects are reported and dropped; the next crawl rediscovers them.
pub struct WorkQueueDispatcher {
    publisher: Arc<dyn QueuePublisher>,
    batch_size: usize,
}

impl WorkQueueDispatcher {
    pub fn new(publisher: Arc<dyn QueuePublisher>, batch_size: usize) -> Self {
        Self {
            publisher,
            batch_size: batch_size.clamp(1, MAX_DISPATCH_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dispatch a known list of ids
    pub async fn enqueue_all<I>(&self, cycle_id: &str, ids: I) -> DispatchReport
    where
        I: IntoIterator<Item = String>,
    {
        let mut report = DispatchReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        for id in ids {
            batch.push(id);
            if batch.len() == self.batch_size {
                self.flush(cycle_id, &mut batch, &mut report).await;
            }
        }
        self.flush(cycle_id, &mut batch, &mut report).await;

        self.log_report(cycle_id, &report);
        report
    }

    /// Dispatch ids as the crawler yields them, flushing every full batch.
    ///
    /// A crawl error stops dispatch; units already sent stay on the queue.
    pub async fn enqueue_stream<S>(
        &self,
        cycle_id: &str,
        ids: S,
    ) -> Result<DispatchReport, SourceError>
    where
        S: Stream<Item = Result<String, SourceError>>,
    {
        let mut ids = std::pin::pin!(ids);
        let mut report = DispatchReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(next) = ids.next().await {
            match next {
                Ok(id) => {
                    batch.push(id);
                    if batch.len() == self.batch_size {
                        self.flush(cycle_id, &mut batch, &mut report).await;
                    }
                }
                Err(e) => {
                    warn!(
                        cycle_id = %cycle_id,
                        enqueued = report.enqueued,
                        error = %e,
                        "Crawl failed mid-listing, stopping dispatch"
                    );
                    return Err(e);
                }
            }
        }
        self.flush(cycle_id, &mut batch, &mut report).await;

        self.log_report(cycle_id, &report);
        Ok(report)
    }

    async fn flush(&self, cycle_id: &str, batch: &mut Vec<String>, report: &mut DispatchReport) {
        if batch.is_empty() {
            return;
        }

        let ids: Vec<String> = std::mem::take(batch);
        let units: Vec<WorkUnit> = ids.iter().map(|id| WorkUnit::new(cycle_id, id.as_str())).collect();

        match self.publisher.publish_batch(units).await {
            Ok(result) => {
                report.enqueued += result.accepted.len();
                metrics::counter!("orgcache.dispatch.enqueued_total")
                    .increment(result.accepted.len() as u64);

                if !result.rejected.is_empty() {
                    let failed_ids: Vec<&str> =
                        result.rejected.iter().map(|r| r.id.as_str()).collect();
                    warn!(
                        cycle_id = %cycle_id,
                        failed_ids = ?failed_ids,
                        "Queue rejected part of a dispatch batch"
                    );
                    metrics::counter!("orgcache.dispatch.failed_total")
                        .increment(result.rejected.len() as u64);
                    report.failed.extend(result.rejected.into_iter().map(|r| FailedDispatch {
                        id: r.id,
                        reason: r.reason,
                    }));
                }
                debug!(cycle_id = %cycle_id, batch = ids.len(), "Dispatched batch");
            }
            Err(e) => {
                warn!(
                    cycle_id = %cycle_id,
                    failed_ids = ?ids,
                    error = %e,
                    "Dispatch batch failed"
                );
                metrics::counter!("orgcache.dispatch.failed_total").increment(ids.len() as u64);
                let reason = e.to_string();
                report.failed.extend(ids.into_iter().map(|id| FailedDispatch {
                    id,
                    reason: reason.clone(),
                }));
            }
        }
    }

    fn log_report(&self, cycle_id: &str, report: &DispatchReport) {
        info!(
            cycle_id = %cycle_id,
            queue = %self.publisher.identifier(),
            enqueued = report.enqueued,
            failed = report.failed.len(),
            "Dispatch finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_queue::MemoryQueue;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:012}", i)).collect()
    }

    #[tokio::test]
    async fn test_every_id_becomes_one_unit() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let dispatcher = WorkQueueDispatcher::new(queue.clone(), 10);

        let report = dispatcher.enqueue_all("cycle-1", ids(23)).await;
        assert_eq!(report.enqueued, 23);
        assert!(report.is_complete());
        assert_eq!(queue.len(), 23);
    }

    #[tokio::test]
    async fn test_batch_size_is_capped() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        assert_eq!(WorkQueueDispatcher::new(queue.clone(), 50).batch_size(), 10);
        assert_eq!(WorkQueueDispatcher::new(queue, 0).batch_size(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_stops_dispatch() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let dispatcher = WorkQueueDispatcher::new(queue.clone(), 2);

        let items = vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
            Err(SourceError::transient("list_entries", "throttled")),
            Ok("c".to_string()),
        ];
        let result = dispatcher
            .enqueue_stream("cycle-1", futures::stream::iter(items))
            .await;

        assert!(result.is_err());
        assert_eq!(queue.pending_ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_listing_dispatches_nothing() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let dispatcher = WorkQueueDispatcher::new(queue.clone(), 10);

        let report = dispatcher.enqueue_all("cycle-1", Vec::new()).await;
        assert_eq!(report, DispatchReport::default());
        assert!(queue.is_empty());
    }
}
