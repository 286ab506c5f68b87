use async_trait::async_trait;
use aws_sdk_sqs::{
    types::{Message as SqsMessage, QueueAttributeName, SendMessageBatchRequestEntry},
    Client,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use oc_common::{QueuedWorkUnit, WorkUnit};
use crate::{
    BatchPublishResult, QueueConsumer, QueueError, QueueMetrics, QueuePublisher, RejectedUnit,
    Result,
};

/// SQS rejects batches larger than this
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Build an SQS client for the given region, honouring an endpoint override (LocalStack).
pub async fn create_client(region: &str, endpoint_url: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;
    Client::new(&config)
}

fn queue_name_from_url(queue_url: &str) -> String {
    queue_url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// AWS SQS work-unit consumer
pub struct SqsQueueConsumer {
    client: Client,
    queue_url: String,
    queue_name: String,
    visibility_timeout_seconds: i32,
    wait_time_seconds: i32,
    running: AtomicBool,
    total_polled: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
}

impl SqsQueueConsumer {
    /// Default long poll wait time in seconds.
    /// AWS SQS max is 20 seconds.
    pub const DEFAULT_WAIT_TIME_SECONDS: i32 = 5;

    pub fn new(client: Client, queue_url: String, visibility_timeout_seconds: i32) -> Self {
        let queue_name = queue_name_from_url(&queue_url);
        Self {
            client,
            queue_url,
            queue_name,
            visibility_timeout_seconds,
            wait_time_seconds: Self::DEFAULT_WAIT_TIME_SECONDS,
            running: AtomicBool::new(true),
            total_polled: AtomicU64::new(0),
            total_acked: AtomicU64::new(0),
            total_nacked: AtomicU64::new(0),
        }
    }

    /// Set the long poll wait time in seconds (max 20).
    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds.clamp(0, 20);
        self
    }

    fn parse_sqs_message(&self, sqs_msg: &SqsMessage) -> Result<(WorkUnit, String, Option<String>)> {
        let body = sqs_msg.body()
            .ok_or_else(|| QueueError::MalformedMessage("message body is empty".to_string()))?;

        let unit: WorkUnit = serde_json::from_str(body)?;

        let receipt_handle = sqs_msg.receipt_handle()
            .ok_or_else(|| QueueError::MalformedMessage("missing receipt handle".to_string()))?
            .to_string();

        let message_id = sqs_msg.message_id().map(|s| s.to_string());

        Ok((unit, receipt_handle, message_id))
    }

    async fn change_visibility(&self, receipt_handle: &str, seconds: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(seconds)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for SqsQueueConsumer {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedWorkUnit>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let result = self.client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, MAX_BATCH_ENTRIES as u32) as i32)
            .visibility_timeout(self.visibility_timeout_seconds)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        let sqs_messages = result.messages.unwrap_or_default();
        let mut units = Vec::with_capacity(sqs_messages.len());

        for sqs_msg in sqs_messages {
            match self.parse_sqs_message(&sqs_msg) {
                Ok((unit, receipt_handle, broker_message_id)) => {
                    units.push(QueuedWorkUnit {
                        unit,
                        receipt_handle,
                        broker_message_id,
                        queue_identifier: self.queue_name.clone(),
                    });
                }
                Err(e) => {
                    error!(
                        queue = %self.queue_name,
                        error = %e,
                        "Failed to parse SQS message"
                    );
                    // ACK the malformed message to prevent infinite redelivery
                    if let Some(handle) = sqs_msg.receipt_handle() {
                        let _ = self.ack(handle).await;
                    }
                }
            }
        }

        if !units.is_empty() {
            self.total_polled.fetch_add(units.len() as u64, Ordering::Relaxed);
            debug!(
                queue = %self.queue_name,
                count = units.len(),
                "Polled work units from SQS"
            );
        }

        Ok(units)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        self.total_acked.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.queue_name, "Work unit acknowledged in SQS");
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay_seconds: Option<u32>) -> Result<()> {
        // Visibility 0 means immediate redelivery
        let visibility_timeout = delay_seconds.unwrap_or(0) as i32;
        self.change_visibility(receipt_handle, visibility_timeout).await?;

        self.total_nacked.fetch_add(1, Ordering::Relaxed);
        debug!(
            queue = %self.queue_name,
            visibility_timeout = visibility_timeout,
            "Work unit NACKed in SQS"
        );
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, seconds: u32) -> Result<()> {
        self.change_visibility(receipt_handle, seconds as i32).await?;
        debug!(queue = %self.queue_name, seconds = seconds, "Visibility extended in SQS");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!(queue = %self.queue_name, "SQS queue consumer stopped");
    }

    async fn get_metrics(&self) -> Result<Option<QueueMetrics>> {
        let result = self.client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        let attributes = result.attributes();

        let pending_messages = attributes
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let in_flight_messages = attributes
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessagesNotVisible))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Some(QueueMetrics {
            pending_messages,
            in_flight_messages,
            queue_identifier: self.queue_name.clone(),
            total_polled: self.total_polled.load(Ordering::Relaxed),
            total_acked: self.total_acked.load(Ordering::Relaxed),
            total_nacked: self.total_nacked.load(Ordering::Relaxed),
        }))
    }
}

/// AWS SQS work-unit publisher
pub struct SqsQueuePublisher {
    client: Client,
    queue_url: String,
    queue_name: String,
}

impl SqsQueuePublisher {
    pub fn new(client: Client, queue_url: String) -> Self {
        let queue_name = queue_name_from_url(&queue_url);
        Self { client, queue_url, queue_name }
    }

    fn is_fifo(&self) -> bool {
        self.queue_url.ends_with(".fifo")
    }

    fn batch_entry(&self, index: usize, unit: &WorkUnit) -> Result<SendMessageBatchRequestEntry> {
        let body = serde_json::to_string(unit)?;

        let mut entry = SendMessageBatchRequestEntry::builder()
            .id(index.to_string())
            .message_body(body);

        // FIFO queues require message_group_id and message_deduplication_id
        if self.is_fifo() {
            entry = entry
                .message_group_id(&unit.id)
                .message_deduplication_id(&unit.dedup_token);
        }

        entry.build().map_err(|e| QueueError::Broker(e.to_string()))
    }
}

#[async_trait]
impl QueuePublisher for SqsQueuePublisher {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn publish(&self, unit: WorkUnit) -> Result<String> {
        let id = unit.id.clone();
        let body = serde_json::to_string(&unit)?;

        let mut request = self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);

        if self.is_fifo() {
            request = request
                .message_group_id(&unit.id)
                .message_deduplication_id(&unit.dedup_token);
        }

        request.send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        Ok(id)
    }

    async fn publish_batch(&self, units: Vec<WorkUnit>) -> Result<BatchPublishResult> {
        if units.len() > MAX_BATCH_ENTRIES {
            return Err(QueueError::BatchTooLarge {
                max: MAX_BATCH_ENTRIES,
                got: units.len(),
            });
        }

        let mut result = BatchPublishResult::default();
        if units.is_empty() {
            return Ok(result);
        }

        let mut entries = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            entries.push(self.batch_entry(index, unit)?);
        }

        let output = self.client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        // Batch entry ids are positions in `units`
        let unit_for = |entry_id: &str| entry_id.parse::<usize>().ok().and_then(|i| units.get(i));

        for ok in output.successful() {
            if let Some(unit) = unit_for(ok.id()) {
                result.accepted.push(unit.id.clone());
            }
        }

        for failed in output.failed() {
            let Some(unit) = unit_for(failed.id()) else {
                warn!(entry = %failed.id(), "SQS reported failure for unknown batch entry");
                continue;
            };
            result.rejected.push(RejectedUnit {
                id: unit.id.clone(),
                reason: format!(
                    "{}: {}",
                    failed.code(),
                    failed.message().unwrap_or("no message")
                ),
            });
        }

        debug!(
            queue = %self.queue_name,
            accepted = result.accepted.len(),
            rejected = result.rejected.len(),
            "Published work unit batch to SQS"
        );

        Ok(result)
    }
}
