//! OrgCache synchronization pipeline.
//!
//! Two stages joined only by the work queue:
//! - crawl: [`CrawlScheduler`] runs a [`CrawlCycle`], which lists the directory and hands ids
//!   to the [`WorkQueueDispatcher`]
//! - write: [`WriterWorker`] polls units and lets [`CacheWriter`] fetch and upsert each entry
//!
//! Delivery is at-least-once and unordered; the idempotent upsert keeps the cache correct.

pub mod cycle;
pub mod dispatcher;
pub mod error;
pub mod scheduler;
pub mod worker;
pub mod writer;

pub use cycle::{CrawlCycle, CycleReport};
pub use dispatcher::{DispatchReport, FailedDispatch, WorkQueueDispatcher};
pub use error::SyncError;
pub use scheduler::CrawlScheduler;
pub use worker::{PollOutcome, WriterWorker};
pub use writer::CacheWriter;

pub type Result<T> = std::result::Result<T, SyncError>;
