//! In-process queue with visibility-timeout semantics, for tests and single-process runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use oc_common::{QueuedWorkUnit, WorkUnit};
use crate::{
    BatchPublishResult, EmbeddedQueue, QueueConsumer, QueueError, QueueMetrics, QueuePublisher,
    Result,
};

/// How long a dedup token suppresses re-enqueues, matching the SQS FIFO window
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

struct StoredUnit {
    unit: WorkUnit,
    message_id: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Default)]
struct QueueState {
    units: Vec<StoredUnit>,
    /// Token -> when it was first enqueued
    seen_tokens: HashMap<String, Instant>,
}

impl QueueState {
    fn expire_tokens(&mut self, now: Instant) {
        self.seen_tokens
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < DEDUP_WINDOW);
    }
}

pub struct MemoryQueue {
    queue_name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    running: AtomicBool,
    total_polled: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
}

impl MemoryQueue {
    pub fn new(queue_name: impl Into<String>, visibility_timeout_seconds: u32) -> Self {
        Self {
            queue_name: queue_name.into(),
            visibility_timeout: Duration::from_secs(visibility_timeout_seconds as u64),
            state: Mutex::new(QueueState::default()),
            running: AtomicBool::new(true),
            total_polled: AtomicU64::new(0),
            total_acked: AtomicU64::new(0),
            total_nacked: AtomicU64::new(0),
        }
    }

    /// Units still held by the queue, visible or in flight
    pub fn len(&self) -> usize {
        self.state.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dedup tokens still inside their window
    pub fn tracked_tokens(&self) -> usize {
        let mut state = self.state.lock();
        state.expire_tokens(Instant::now());
        state.seen_tokens.len()
    }

    /// Ids of every held unit, in enqueue order
    pub fn pending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .units
            .iter()
            .map(|stored| stored.unit.id.clone())
            .collect()
    }

    /// Returns `false` when the token is still inside its dedup window
    fn enqueue(state: &mut QueueState, unit: WorkUnit, now: Instant) -> bool {
        if state.seen_tokens.contains_key(&unit.dedup_token) {
            return false;
        }

        state.seen_tokens.insert(unit.dedup_token.clone(), now);
        state.units.push(StoredUnit {
            unit,
            message_id: uuid::Uuid::new_v4().to_string(),
            visible_at: now,
            receipt_handle: None,
            receive_count: 0,
        });
        true
    }

    fn set_visibility(&self, receipt_handle: &str, delay: Duration, release: bool) -> Result<()> {
        let mut state = self.state.lock();
        let stored = state
            .units
            .iter_mut()
            .find(|stored| stored.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))?;

        stored.visible_at = Instant::now() + delay;
        if release {
            stored.receipt_handle = None;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedWorkUnit>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        let mut polled = Vec::new();

        for stored in state.units.iter_mut() {
            if polled.len() >= max_messages as usize {
                break;
            }
            if stored.visible_at > now {
                continue;
            }

            let receipt_handle = uuid::Uuid::new_v4().to_string();
            stored.receipt_handle = Some(receipt_handle.clone());
            stored.visible_at = now + self.visibility_timeout;
            stored.receive_count += 1;

            polled.push(QueuedWorkUnit {
                unit: stored.unit.clone(),
                receipt_handle,
                broker_message_id: Some(stored.message_id.clone()),
                queue_identifier: self.queue_name.clone(),
            });
        }

        self.total_polled.fetch_add(polled.len() as u64, Ordering::Relaxed);
        Ok(polled)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.units.len();
        state
            .units
            .retain(|stored| stored.receipt_handle.as_deref() != Some(receipt_handle));

        if state.units.len() == before {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }

        self.total_acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay_seconds: Option<u32>) -> Result<()> {
        let delay = Duration::from_secs(delay_seconds.unwrap_or(0) as u64);
        self.set_visibility(receipt_handle, delay, true)?;
        self.total_nacked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, seconds: u32) -> Result<()> {
        self.set_visibility(receipt_handle, Duration::from_secs(seconds as u64), false)
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn get_metrics(&self) -> Result<Option<QueueMetrics>> {
        let now = Instant::now();
        let state = self.state.lock();
        let pending = state.units.iter().filter(|s| s.visible_at <= now).count() as u64;

        Ok(Some(QueueMetrics {
            pending_messages: pending,
            in_flight_messages: state.units.len() as u64 - pending,
            queue_identifier: self.queue_name.clone(),
            total_polled: self.total_polled.load(Ordering::Relaxed),
            total_acked: self.total_acked.load(Ordering::Relaxed),
            total_nacked: self.total_nacked.load(Ordering::Relaxed),
        }))
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn publish(&self, unit: WorkUnit) -> Result<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_tokens(now);
        let id = unit.id.clone();
        let dedup_token = unit.dedup_token.clone();
        if !Self::enqueue(&mut state, unit, now) {
            return Err(QueueError::Duplicate { id, dedup_token });
        }
        Ok(id)
    }

    async fn publish_batch(&self, units: Vec<WorkUnit>) -> Result<BatchPublishResult> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_tokens(now);

        // A duplicate is already queued, so it still counts as accepted
        let mut result = BatchPublishResult::default();
        for unit in units {
            let id = unit.id.clone();
            if !Self::enqueue(&mut state, unit, now) {
                debug!(entry_id = %id, queue = %self.queue_name, "Duplicate work unit detected, skipping");
            }
            result.accepted.push(id);
        }
        Ok(result)
    }
}

#[async_trait]
impl EmbeddedQueue for MemoryQueue {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}
