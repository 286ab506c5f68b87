//! OrgCache query layer.
//!
//! [`QueryService::resolve`] turns every read pattern into a [`QueryPlan`] of index and match
//! mode, runs it against the cache store, and returns decoded entries or an explicit
//! [`QueryOutcome::NoResults`].

pub mod api;
pub mod error;
pub mod query;
pub mod service;

pub use error::{ErrorResponse, QueryError};
pub use query::{Lookup, MatchMode, Query, QueryPlan, MAX_IDS_PER_REQUEST};
pub use service::{QueryOutcome, QueryService};

pub type Result<T> = std::result::Result<T, QueryError>;
