//! Access to the remote organization directory.
//!
//! A [`CredentialBroker`] exchanges the service identity for short-lived credentials, a
//! [`DirectoryConnector`] turns those into a [`DirectoryClient`], and an [`OrgTreeCrawler`]
//! drives the client with bounded retries.

pub mod broker;
pub mod client;
pub mod crawler;
pub mod error;
pub mod mock;
pub mod retry;

#[cfg(feature = "aws")]
pub mod aws;

pub use broker::{CredentialBroker, StaticCredentialBroker};
pub use client::{DirectoryClient, DirectoryConnector, EntryPage, ParentKind, ParentRef};
pub use crawler::OrgTreeCrawler;
pub use error::SourceError;
pub use retry::RetryPolicy;

pub type Result<T> = std::result::Result<T, SourceError>;
