use std::time::Duration;

use oc_cache::CacheError;
use oc_queue::QueueError;
use oc_source::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{operation} exceeded its {budget:?} budget")]
    Timeout { operation: String, budget: Duration },
}

impl SyncError {
    /// Failures that abort a whole crawl cycle rather than one entry
    pub fn is_authorization(&self) -> bool {
        matches!(self, SyncError::Source(e) if e.is_authorization())
    }
}
