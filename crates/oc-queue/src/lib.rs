use std::sync::Arc;

use async_trait::async_trait;
use oc_common::{QueuedWorkUnit, WorkUnit};
use oc_config::QueueConfig;

pub mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use error::QueueError;
pub use memory::MemoryQueue;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    /// Approximate number of units visible in the queue (pending)
    pub pending_messages: u64,
    /// Approximate number of units currently being processed (in-flight)
    pub in_flight_messages: u64,
    /// Queue identifier
    pub queue_identifier: String,
    /// Total units polled from this queue
    pub total_polled: u64,
    /// Total units successfully acknowledged
    pub total_acked: u64,
    /// Total units negatively acknowledged (left for redelivery)
    pub total_nacked: u64,
}

/// A work unit the queue refused to take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedUnit {
    pub id: String,
    pub reason: String,
}

/// Per-unit outcome of a batch enqueue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPublishResult {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedUnit>,
}

impl BatchPublishResult {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Trait for consuming work units from a queue.
///
/// Delivery is at-least-once: a unit that is polled but never acked becomes visible again
/// once its visibility window elapses.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Get the unique identifier for this consumer
    fn identifier(&self) -> &str;

    /// Poll for work units
    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedWorkUnit>>;

    /// Acknowledge a unit (remove from queue)
    async fn ack(&self, receipt_handle: &str) -> Result<()>;

    /// Negative acknowledge a unit (make visible again after delay)
    async fn nack(&self, receipt_handle: &str, delay_seconds: Option<u32>) -> Result<()>;

    /// Extend visibility timeout for a unit
    async fn extend_visibility(&self, receipt_handle: &str, seconds: u32) -> Result<()>;

    /// Check if the consumer is healthy
    fn is_healthy(&self) -> bool;

    /// Stop the consumer
    async fn stop(&self);

    /// Get queue metrics (pending/in-flight counts).
    /// Returns None if metrics are not available for this queue type
    async fn get_metrics(&self) -> Result<Option<QueueMetrics>> {
        Ok(None)
    }
}

/// Trait for publishing work units to a queue
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Get the queue identifier
    fn identifier(&self) -> &str;

    /// Publish a single unit, returning its id
    async fn publish(&self, unit: WorkUnit) -> Result<String>;

    /// Publish a batch of units.
    ///
    /// `Err` means the whole batch failed in transport; individual refusals are reported in
    /// [`BatchPublishResult::rejected`].
    async fn publish_batch(&self, units: Vec<WorkUnit>) -> Result<BatchPublishResult>;
}

/// Combined consumer and publisher for embedded/dev mode
#[async_trait]
pub trait EmbeddedQueue: QueueConsumer + QueuePublisher {
    /// Initialize the queue schema (create tables, etc.)
    async fn init_schema(&self) -> Result<()>;
}

/// Publisher for the queue `config` names.
///
/// The memory queue has no out-of-process identity, so callers that want it build a
/// [`MemoryQueue`] themselves and share it between publisher and consumer.
pub async fn create_publisher(config: &QueueConfig) -> Result<Arc<dyn QueuePublisher>> {
    match config.queue_type.as_str() {
        #[cfg(feature = "sqs")]
        "sqs" => {
            let client = sqs_client(config).await?;
            tracing::info!(queue_url = %config.sqs.queue_url, "Publishing work units to SQS");
            Ok(Arc::new(sqs::SqsQueuePublisher::new(client, config.sqs.queue_url.clone())))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let queue = open_sqlite(config).await?;
            tracing::info!(queue = %config.sqlite.queue_name, "Publishing work units to embedded SQLite queue");
            Ok(Arc::new(queue))
        }
        other => Err(unopenable(other)),
    }
}

/// Consumer for the queue `config` names; see [`create_publisher`] for the memory queue.
pub async fn create_consumer(config: &QueueConfig) -> Result<Arc<dyn QueueConsumer>> {
    match config.queue_type.as_str() {
        #[cfg(feature = "sqs")]
        "sqs" => {
            let client = sqs_client(config).await?;
            tracing::info!(queue_url = %config.sqs.queue_url, "Consuming work units from SQS");
            Ok(Arc::new(
                sqs::SqsQueueConsumer::new(client, config.sqs.queue_url.clone(), config.sqs.visibility_timeout)
                    .with_wait_time_seconds(config.sqs.wait_time_seconds),
            ))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let queue = open_sqlite(config).await?;
            tracing::info!(queue = %config.sqlite.queue_name, "Consuming work units from embedded SQLite queue");
            Ok(Arc::new(queue))
        }
        other => Err(unopenable(other)),
    }
}

fn unopenable(queue_type: &str) -> QueueError {
    match queue_type {
        "memory" => QueueError::Misconfigured(
            "the memory queue only exists inside one process and cannot be opened by name".to_string(),
        ),
        other => QueueError::Misconfigured(format!("unsupported queue type: {}", other)),
    }
}

#[cfg(feature = "sqs")]
async fn sqs_client(config: &QueueConfig) -> Result<aws_sdk_sqs::Client> {
    if config.sqs.queue_url.is_empty() {
        return Err(QueueError::Misconfigured(
            "queue.sqs.queue_url must be set for the sqs queue type".to_string(),
        ));
    }
    Ok(sqs::create_client(&config.sqs.region, config.sqs.endpoint_url.as_deref()).await)
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(config: &QueueConfig) -> Result<sqlite::SqliteQueue> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.sqlite.url)
        .await?;
    let queue = sqlite::SqliteQueue::new(
        pool,
        config.sqlite.queue_name.clone(),
        config.sqlite.visibility_timeout,
    );
    queue.init_schema().await?;
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_config(queue_type: &str) -> QueueConfig {
        QueueConfig {
            queue_type: queue_type.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_memory_queue_cannot_be_opened_by_name() {
        let config = queue_config("memory");
        assert!(matches!(create_publisher(&config).await, Err(QueueError::Misconfigured(_))));
        assert!(matches!(create_consumer(&config).await, Err(QueueError::Misconfigured(_))));
    }

    #[tokio::test]
    async fn test_unknown_queue_type_is_refused() {
        match create_consumer(&queue_config("kafka")).await {
            Err(QueueError::Misconfigured(reason)) => assert!(reason.contains("kafka")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("unknown queue type accepted"),
        }
    }

    #[cfg(feature = "sqs")]
    #[tokio::test]
    async fn test_sqs_requires_queue_url() {
        let config = queue_config("sqs");
        assert!(matches!(create_publisher(&config).await, Err(QueueError::Misconfigured(_))));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_publisher_and_consumer_share_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = queue_config("sqlite");
        config.sqlite.url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());

        let publisher = create_publisher(&config).await.unwrap();
        let consumer = create_consumer(&config).await.unwrap();

        publisher.publish(WorkUnit::new("cycle-1", "111")).await.unwrap();
        let polled = consumer.poll(10).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].unit.id, "111");
        consumer.ack(&polled[0].receipt_handle).await.unwrap();
    }
}
