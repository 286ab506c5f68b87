use std::sync::Arc;

use async_trait::async_trait;
use oc_common::{Credentials, EntryDetail, TagSet};

use crate::Result;

/// One page of entry ids from the directory listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPage {
    pub ids: Vec<String>,
    /// Absent on the last page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    Root,
    OrganizationalUnit,
}

/// Immediate parent of an entry or unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub id: String,
    pub kind: ParentKind,
}

impl ParentRef {
    pub fn root(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: ParentKind::Root }
    }

    pub fn unit(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: ParentKind::OrganizationalUnit }
    }

    pub fn is_root(&self) -> bool {
        self.kind == ParentKind::Root
    }
}

/// Read-only access to the remote hierarchical directory.
///
/// Implementations surface throttling and other recoverable failures as transient
/// [`SourceError::SourceApi`](crate::SourceError::SourceApi) errors and leave retrying to
/// the caller.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// One page of the flat entry listing, starting at `cursor` (None for the first page)
    async fn list_entries(&self, cursor: Option<&str>) -> Result<EntryPage>;

    async fn describe_entry(&self, id: &str) -> Result<EntryDetail>;

    /// Complete tag mapping of an entry, across however many pages the source uses
    async fn list_tags(&self, id: &str) -> Result<TagSet>;

    /// Immediate parent, or None for the root itself
    async fn parent_of(&self, id: &str) -> Result<Option<ParentRef>>;
}

/// Builds a directory client bound to a set of delegated credentials
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn DirectoryClient>>;
}
