//! Paginated enumeration of the directory and ancestor-chain resolution.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use oc_common::{DirectoryEntry, TagSet, MAX_OU_DEPTH};
use tracing::{debug, warn};

use crate::client::DirectoryClient;
use crate::retry::RetryPolicy;
use crate::{Result, SourceError};

/// Walks a directory through one credential-scoped client.
///
/// Every source call goes through the crawler's [`RetryPolicy`].
#[derive(Clone)]
pub struct OrgTreeCrawler {
    client: Arc<dyn DirectoryClient>,
    retry: RetryPolicy,
    max_depth: usize,
}

struct ListingState {
    client: Arc<dyn DirectoryClient>,
    retry: RetryPolicy,
    cursor: Option<String>,
    buffered: VecDeque<String>,
    exhausted: bool,
    pages: u64,
}

impl OrgTreeCrawler {
    pub fn new(client: Arc<dyn DirectoryClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            max_depth: MAX_OU_DEPTH,
        }
    }

    /// Lazily yield every entry id, fetching the next page only once the current one is drained.
    ///
    /// The stream ends after the last page and yields at most one error, after which it is done.
    pub fn list_all_entries(&self) -> BoxStream<'static, Result<String>> {
        let state = ListingState {
            client: self.client.clone(),
            retry: self.retry.clone(),
            cursor: None,
            buffered: VecDeque::new(),
            exhausted: false,
            pages: 0,
        };

        stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(id) = state.buffered.pop_front() {
                    return Ok(Some((id, state)));
                }
                if state.exhausted {
                    debug!(pages = state.pages, "Directory listing exhausted");
                    return Ok(None);
                }

                let cursor = state.cursor.take();
                let client = state.client.clone();
                let page = state
                    .retry
                    .run("list_entries", || client.list_entries(cursor.as_deref()))
                    .await?;

                state.pages += 1;
                state.exhausted = page.next_cursor.is_none();
                state.cursor = page.next_cursor;
                state.buffered.extend(page.ids);
            }
        })
        .boxed()
    }

    /// Ancestor unit ids of `id`, root first, immediate parent last.
    ///
    /// Fails with [`SourceError::UnresolvedHierarchy`] when no root is reached within the depth
    /// bound.
    pub async fn resolve_ancestor_path(&self, id: &str) -> Result<Vec<String>> {
        let mut path = VecDeque::with_capacity(self.max_depth);
        let mut current = id.to_string();

        for _ in 0..self.max_depth {
            let parent = self
                .retry
                .run("parent_of", || self.client.parent_of(&current))
                .await?;

            let Some(parent) = parent else {
                // The walk started at (or reached) something with no parent at all
                return Ok(path.into());
            };

            path.push_front(parent.id.clone());
            if parent.is_root() {
                return Ok(path.into());
            }
            current = parent.id;
        }

        warn!(entry_id = %id, max_depth = self.max_depth, "Ancestor walk exceeded depth bound");
        Err(SourceError::UnresolvedHierarchy {
            id: id.to_string(),
            max_depth: self.max_depth,
        })
    }

    pub async fn list_tags(&self, id: &str) -> Result<TagSet> {
        self.retry.run("list_tags", || self.client.list_tags(id)).await
    }

    /// Everything the cache stores about one entry: detail, tags and ancestor path
    pub async fn fetch_entry(&self, id: &str) -> Result<DirectoryEntry> {
        let detail = self
            .retry
            .run("describe_entry", || self.client.describe_entry(id))
            .await?;
        let tags = self.list_tags(id).await?;
        let ou_path = self.resolve_ancestor_path(id).await?;

        Ok(DirectoryEntry {
            id: detail.id,
            name: detail.name,
            status: detail.status,
            email_address: detail.email_address,
            ou_path,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDirectory, MockOperation};
    use futures::TryStreamExt;

    fn crawler(directory: MockDirectory) -> OrgTreeCrawler {
        OrgTreeCrawler::new(Arc::new(directory), RetryPolicy::none())
    }

    fn sample_directory() -> MockDirectory {
        let directory = MockDirectory::new().with_page_size(2);
        directory.add_root("r-root");
        directory.add_unit("ou-a", "r-root");
        directory.add_unit("ou-b", "ou-a");
        directory.add_entry("111", "r-root");
        directory.add_entry("222", "ou-a");
        directory.add_entry("333", "ou-b");
        directory.add_entry("444", "ou-b");
        directory.add_entry("555", "ou-b");
        directory
    }

    #[tokio::test]
    async fn test_listing_follows_every_page() {
        let directory = Arc::new(sample_directory());
        let crawler = OrgTreeCrawler::new(directory.clone(), RetryPolicy::none());

        let ids: Vec<String> = crawler.list_all_entries().try_collect().await.unwrap();
        assert_eq!(ids, vec!["111", "222", "333", "444", "555"]);
        assert_eq!(directory.call_count(MockOperation::ListEntries), 3);
    }

    #[tokio::test]
    async fn test_listing_is_lazy() {
        let directory = Arc::new(sample_directory());
        let crawler = OrgTreeCrawler::new(directory.clone(), RetryPolicy::none());

        let mut ids = crawler.list_all_entries();
        assert_eq!(ids.next().await, Some(Ok("111".to_string())));
        assert_eq!(directory.call_count(MockOperation::ListEntries), 1);
    }

    #[tokio::test]
    async fn test_empty_directory_yields_nothing() {
        let crawler = crawler(MockDirectory::new());
        let ids: Vec<String> = crawler.list_all_entries().try_collect().await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_listing_error_ends_stream() {
        let directory = sample_directory();
        directory.fail_permanently(MockOperation::ListEntries);
        let crawler = crawler(directory);

        let result: Result<Vec<String>> = crawler.list_all_entries().try_collect().await;
        assert!(matches!(result, Err(SourceError::SourceApi { transient: false, .. })));
    }

    #[tokio::test]
    async fn test_ancestor_path_is_root_first() {
        let crawler = crawler(sample_directory());

        assert_eq!(crawler.resolve_ancestor_path("111").await.unwrap(), vec!["r-root"]);
        assert_eq!(
            crawler.resolve_ancestor_path("333").await.unwrap(),
            vec!["r-root", "ou-a", "ou-b"]
        );
    }

    #[tokio::test]
    async fn test_five_level_chain_resolves() {
        let directory = MockDirectory::new();
        directory.add_root("r");
        directory.add_unit("ou-1", "r");
        directory.add_unit("ou-2", "ou-1");
        directory.add_unit("ou-3", "ou-2");
        directory.add_unit("ou-4", "ou-3");
        directory.add_entry("deep", "ou-4");

        let path = crawler(directory).resolve_ancestor_path("deep").await.unwrap();
        assert_eq!(path, vec!["r", "ou-1", "ou-2", "ou-3", "ou-4"]);
    }

    #[tokio::test]
    async fn test_root_plus_five_units_exceeds_bound() {
        let directory = MockDirectory::new();
        directory.add_root("r");
        directory.add_unit("ou-1", "r");
        directory.add_unit("ou-2", "ou-1");
        directory.add_unit("ou-3", "ou-2");
        directory.add_unit("ou-4", "ou-3");
        directory.add_unit("ou-5", "ou-4");
        directory.add_entry("deepest", "ou-5");
        directory.add_entry("shallower", "ou-4");

        let crawler = crawler(directory);
        assert!(crawler.resolve_ancestor_path("shallower").await.is_ok());
        assert!(matches!(
            crawler.resolve_ancestor_path("deepest").await,
            Err(SourceError::UnresolvedHierarchy { max_depth: MAX_OU_DEPTH, .. })
        ));
    }

    #[tokio::test]
    async fn test_walk_beyond_depth_bound_is_unresolved() {
        let directory = MockDirectory::new();
        // A parent cycle never reaches a root
        directory.set_parent("ou-x", crate::ParentRef::unit("ou-y"));
        directory.set_parent("ou-y", crate::ParentRef::unit("ou-x"));
        directory.add_entry("lost", "ou-x");
        let directory = Arc::new(directory);
        let crawler = OrgTreeCrawler::new(directory.clone(), RetryPolicy::none());

        let err = crawler.resolve_ancestor_path("lost").await.unwrap_err();
        assert_eq!(
            err,
            SourceError::UnresolvedHierarchy {
                id: "lost".to_string(),
                max_depth: MAX_OU_DEPTH
            }
        );
        assert_eq!(directory.call_count(MockOperation::ParentOf), MAX_OU_DEPTH as u32);
    }

    #[tokio::test]
    async fn test_fetch_entry_assembles_detail_tags_and_path() {
        let directory = sample_directory();
        directory.set_tags("333", [("env", "prod"), ("team", "core")]);

        let entry = crawler(directory).fetch_entry("333").await.unwrap();
        assert_eq!(entry.id, "333");
        assert_eq!(entry.email_address, "333@example.com");
        assert_eq!(entry.ou_path, vec!["r-root", "ou-a", "ou-b"]);
        assert_eq!(entry.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_listing_failures_are_retried() {
        let directory = Arc::new(sample_directory());
        directory.fail_transiently(MockOperation::ListEntries, 2);
        let crawler = OrgTreeCrawler::new(directory.clone(), RetryPolicy::default());

        let ids: Vec<String> = crawler.list_all_entries().try_collect().await.unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(directory.call_count(MockOperation::ListEntries), 5);
    }
}
