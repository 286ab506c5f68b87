//! One crawl-and-dispatch cycle

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oc_common::logging::cycle_span;
use oc_source::{CredentialBroker, DirectoryConnector, OrgTreeCrawler, RetryPolicy};
use tracing::{error, info, Instrument};

use crate::dispatcher::{DispatchReport, WorkQueueDispatcher};
use crate::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dispatch: DispatchReport,
}

/// Assume credentials, enumerate the directory, and dispatch one work unit per entry,
/// all within a wall-clock budget.
pub struct CrawlCycle {
    broker: Arc<dyn CredentialBroker>,
    connector: Arc<dyn DirectoryConnector>,
    dispatcher: WorkQueueDispatcher,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CrawlCycle {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        connector: Arc<dyn DirectoryConnector>,
        dispatcher: WorkQueueDispatcher,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            connector,
            dispatcher,
            retry,
            timeout,
        }
    }

    pub async fn run(&self) -> Result<CycleReport> {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let span = cycle_span(&cycle_id);

        async {
            let started_at = Utc::now();
            info!("Crawl cycle starting");

            let dispatch = match tokio::time::timeout(self.timeout, self.crawl(&cycle_id)).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(error = %e, "Crawl cycle aborted");
                    return Err(e);
                }
                Err(_) => {
                    error!(budget_secs = self.timeout.as_secs(), "Crawl cycle timed out");
                    return Err(SyncError::Timeout {
                        operation: "crawl cycle".to_string(),
                        budget: self.timeout,
                    });
                }
            };

            let finished_at = Utc::now();
            info!(
                enqueued = dispatch.enqueued,
                failed = dispatch.failed.len(),
                elapsed_ms = (finished_at - started_at).num_milliseconds(),
                "Crawl cycle finished"
            );
            metrics::counter!("orgcache.crawl.cycles_total").increment(1);

            Ok(CycleReport {
                cycle_id: cycle_id.clone(),
                started_at,
                finished_at,
                dispatch,
            })
        }
        .instrument(span)
        .await
    }

    async fn crawl(&self, cycle_id: &str) -> Result<DispatchReport> {
        let credentials = self.broker.assume().await?;
        let client = self.connector.connect(&credentials).await?;
        let crawler = OrgTreeCrawler::new(client, self.retry.clone());

        let report = self
            .dispatcher
            .enqueue_stream(cycle_id, crawler.list_all_entries())
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_queue::MemoryQueue;
    use oc_source::mock::{MockConnector, MockCredentialBroker, MockDirectory, MockOperation};

    fn directory(entries: usize) -> Arc<MockDirectory> {
        let directory = MockDirectory::new().with_page_size(4);
        directory.add_root("r-1");
        for i in 0..entries {
            directory.add_entry(&format!("{:012}", i), "r-1");
        }
        Arc::new(directory)
    }

    fn cycle(
        broker: MockCredentialBroker,
        directory: Arc<MockDirectory>,
        queue: Arc<MemoryQueue>,
    ) -> CrawlCycle {
        CrawlCycle::new(
            Arc::new(broker),
            Arc::new(MockConnector::new(directory)),
            WorkQueueDispatcher::new(queue, 10),
            RetryPolicy::none(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_cycle_dispatches_every_entry() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let report = cycle(MockCredentialBroker::new(), directory(13), queue.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.dispatch.enqueued, 13);
        assert_eq!(queue.len(), 13);
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_cycles_get_distinct_ids() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let c = cycle(MockCredentialBroker::new(), directory(2), queue.clone());

        let first = c.run().await.unwrap();
        let second = c.run().await.unwrap();
        assert_ne!(first.cycle_id, second.cycle_id);
        // A new cycle re-enqueues every entry
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let queue = Arc::new(MemoryQueue::new("units", 30));
        let directory = directory(3);
        directory.fail_permanently(MockOperation::ListEntries);

        let err = cycle(MockCredentialBroker::new(), directory, queue.clone())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Source(_)));
        assert!(queue.is_empty());
    }
}
