use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use oc_common::{QueuedWorkUnit, WorkUnit};
use crate::{
    BatchPublishResult, EmbeddedQueue, QueueConsumer, QueueError, QueueMetrics, QueuePublisher,
    Result,
};

/// SQLite-based queue that mimics SQS visibility semantics for local development.
///
/// Rows are keyed by the work unit's dedup token, so re-enqueueing within a cycle is a no-op.
pub struct SqliteQueue {
    pool: Pool<Sqlite>,
    queue_name: String,
    visibility_timeout_seconds: u32,
    running: AtomicBool,
}

impl SqliteQueue {
    pub fn new(pool: Pool<Sqlite>, queue_name: String, visibility_timeout_seconds: u32) -> Self {
        Self {
            pool,
            queue_name,
            visibility_timeout_seconds,
            running: AtomicBool::new(true),
        }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS work_units (
                dedup_token TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                receipt_handle TEXT,
                visible_at INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                receive_count INTEGER DEFAULT 0,
                PRIMARY KEY (queue_name, dedup_token)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_work_units_visible
            ON work_units (queue_name, visible_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!(queue = %self.queue_name, "SQLite queue schema initialized");
        Ok(())
    }

    /// Returns `false` when the dedup token is already queued
    async fn insert(&self, unit: &WorkUnit) -> Result<bool> {
        let now = Utc::now().timestamp();
        let payload = serde_json::to_string(unit)?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO work_units (dedup_token, queue_name, entry_id, visible_at, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&unit.dedup_token)
        .bind(&self.queue_name)
        .bind(&unit.id)
        .bind(now)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }
}

#[async_trait]
impl QueueConsumer for SqliteQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedWorkUnit>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let now = Utc::now().timestamp();
        let new_visible_at = now + self.visibility_timeout_seconds as i64;

        let rows = sqlx::query(
            r#"
            SELECT dedup_token, payload
            FROM work_units
            WHERE queue_name = ? AND visible_at <= ?
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(&self.queue_name)
        .bind(now)
        .bind(max_messages as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut units = Vec::with_capacity(rows.len());

        for row in rows {
            let dedup_token: String = row.get("dedup_token");
            let payload: String = row.get("payload");
            let receipt_handle = uuid::Uuid::new_v4().to_string();

            let updated = sqlx::query(
                r#"
                UPDATE work_units
                SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1
                WHERE dedup_token = ? AND queue_name = ? AND visible_at <= ?
                "#,
            )
            .bind(&receipt_handle)
            .bind(new_visible_at)
            .bind(&dedup_token)
            .bind(&self.queue_name)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                // Another consumer grabbed this unit
                continue;
            }

            let unit: WorkUnit = serde_json::from_str(&payload)?;
            units.push(QueuedWorkUnit {
                unit,
                receipt_handle,
                broker_message_id: Some(dedup_token),
                queue_identifier: self.queue_name.clone(),
            });
        }

        if !units.is_empty() {
            debug!(
                queue = %self.queue_name,
                count = units.len(),
                "Polled work units from SQLite queue"
            );
        }

        Ok(units)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM work_units WHERE receipt_handle = ? AND queue_name = ?",
        )
        .bind(receipt_handle)
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                receipt_handle = %receipt_handle,
                queue = %self.queue_name,
                "ACK failed - unit not found or already deleted"
            );
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }

        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay_seconds: Option<u32>) -> Result<()> {
        let delay = delay_seconds.unwrap_or(0) as i64;
        let new_visible_at = Utc::now().timestamp() + delay;

        let result = sqlx::query(
            r#"
            UPDATE work_units
            SET visible_at = ?, receipt_handle = NULL
            WHERE receipt_handle = ? AND queue_name = ?
            "#,
        )
        .bind(new_visible_at)
        .bind(receipt_handle)
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                receipt_handle = %receipt_handle,
                queue = %self.queue_name,
                "NACK failed - unit not found"
            );
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }

        debug!(queue = %self.queue_name, delay_seconds = delay, "Work unit negative acknowledged");
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, seconds: u32) -> Result<()> {
        let new_visible_at = Utc::now().timestamp() + seconds as i64;

        let result = sqlx::query(
            "UPDATE work_units SET visible_at = ? WHERE receipt_handle = ? AND queue_name = ?",
        )
        .bind(new_visible_at)
        .bind(receipt_handle)
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!(queue = %self.queue_name, "SQLite queue consumer stopped");
    }

    async fn get_metrics(&self) -> Result<Option<QueueMetrics>> {
        let now = Utc::now().timestamp();

        let pending_row = sqlx::query(
            "SELECT COUNT(*) as count FROM work_units WHERE queue_name = ? AND visible_at <= ?"
        )
        .bind(&self.queue_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let pending_messages: i64 = pending_row.get("count");

        let in_flight_row = sqlx::query(
            "SELECT COUNT(*) as count FROM work_units WHERE queue_name = ? AND visible_at > ?"
        )
        .bind(&self.queue_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let in_flight_messages: i64 = in_flight_row.get("count");

        Ok(Some(QueueMetrics {
            pending_messages: pending_messages as u64,
            in_flight_messages: in_flight_messages as u64,
            queue_identifier: self.queue_name.clone(),
            ..Default::default()
        }))
    }
}

#[async_trait]
impl QueuePublisher for SqliteQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn publish(&self, unit: WorkUnit) -> Result<String> {
        if !self.insert(&unit).await? {
            return Err(QueueError::Duplicate {
                id: unit.id,
                dedup_token: unit.dedup_token,
            });
        }
        Ok(unit.id)
    }

    async fn publish_batch(&self, units: Vec<WorkUnit>) -> Result<BatchPublishResult> {
        let mut result = BatchPublishResult::default();
        for unit in units {
            if !self.insert(&unit).await? {
                debug!(entry_id = %unit.id, queue = %self.queue_name, "Duplicate work unit detected, skipping");
            }
            result.accepted.push(unit.id);
        }
        Ok(result)
    }
}

#[async_trait]
impl EmbeddedQueue for SqliteQueue {
    async fn init_schema(&self) -> Result<()> {
        self.create_schema().await
    }
}
