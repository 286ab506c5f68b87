//! Queue failures, split by what the caller can do about them

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The embedded SQLite queue could not be read or written
    #[error("Queue database error: {0}")]
    Database(String),

    /// A work-unit envelope could not be encoded or decoded
    #[error("Work unit envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// A delivered message is missing its body or receipt handle
    #[error("Malformed queue message: {0}")]
    MalformedMessage(String),

    /// The handle no longer names an in-flight unit: already acked, or redelivered under a new handle
    #[error("Receipt handle not held by the queue: {0}")]
    UnknownReceipt(String),

    #[error("Queue is stopped")]
    Stopped,

    /// A broker call failed in transport; nothing in the request is known to have landed
    #[error("Queue broker error: {0}")]
    Broker(String),

    /// More units than the broker takes in one request
    #[error("Batch of {got} work units exceeds the limit of {max}")]
    BatchTooLarge { max: usize, got: usize },

    /// The unit's dedup token was already enqueued inside the dedup window
    #[error("Work unit {id} duplicates an enqueued token ({dedup_token})")]
    Duplicate { id: String, dedup_token: String },

    /// The queue settings name no backend this build can open
    #[error("Queue misconfigured: {0}")]
    Misconfigured(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}
