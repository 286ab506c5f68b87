//! In-memory directory, connector and credential broker for tests and local runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use oc_common::{Credentials, EntryDetail, TagSet};

use crate::broker::CredentialBroker;
use crate::client::{DirectoryClient, DirectoryConnector, EntryPage, ParentKind, ParentRef};
use crate::{Result, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    ListEntries,
    DescribeEntry,
    ListTags,
    ParentOf,
}

impl MockOperation {
    fn name(self) -> &'static str {
        match self {
            MockOperation::ListEntries => "list_entries",
            MockOperation::DescribeEntry => "describe_entry",
            MockOperation::ListTags => "list_tags",
            MockOperation::ParentOf => "parent_of",
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    roots: HashSet<String>,
    entries: BTreeMap<String, EntryDetail>,
    tags: HashMap<String, TagSet>,
    parents: HashMap<String, ParentRef>,
    transient_failures: HashMap<MockOperation, u32>,
    permanent_failures: HashSet<MockOperation>,
    calls: HashMap<MockOperation, u32>,
    latency: Duration,
}

/// A directory tree held in memory.
///
/// Listing pages through entries in id order. Failures can be injected per operation.
pub struct MockDirectory {
    state: Mutex<DirectoryState>,
    page_size: usize,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            page_size: 20,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn add_root(&self, id: &str) {
        self.state.lock().roots.insert(id.to_string());
    }

    pub fn add_unit(&self, id: &str, parent_id: &str) {
        let parent = self.parent_ref(parent_id);
        self.set_parent(id, parent);
    }

    /// Add an entry with generated detail fields
    pub fn add_entry(&self, id: &str, parent_id: &str) {
        self.put_entry(
            EntryDetail {
                id: id.to_string(),
                name: format!("entry-{}", id),
                status: "ACTIVE".to_string(),
                email_address: format!("{}@example.com", id),
            },
            parent_id,
        );
    }

    pub fn put_entry(&self, detail: EntryDetail, parent_id: &str) {
        let parent = self.parent_ref(parent_id);
        let mut state = self.state.lock();
        state.parents.insert(detail.id.clone(), parent);
        state.entries.insert(detail.id.clone(), detail);
    }

    pub fn set_parent(&self, id: &str, parent: ParentRef) {
        self.state.lock().parents.insert(id.to_string(), parent);
    }

    pub fn set_tags<'a>(&self, id: &str, tags: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let tags = tags
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().tags.insert(id.to_string(), tags);
    }

    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(detail) = self.state.lock().entries.get_mut(id) {
            detail.status = status.to_string();
        }
    }

    /// The next `times` calls of `operation` fail with a transient error
    pub fn fail_transiently(&self, operation: MockOperation, times: u32) {
        self.state.lock().transient_failures.insert(operation, times);
    }

    /// Every call of `operation` fails with a non-retryable error
    pub fn fail_permanently(&self, operation: MockOperation) {
        self.state.lock().permanent_failures.insert(operation);
    }

    /// Every call sleeps this long before answering
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.transient_failures.clear();
        state.permanent_failures.clear();
    }

    pub fn call_count(&self, operation: MockOperation) -> u32 {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    fn parent_ref(&self, parent_id: &str) -> ParentRef {
        let kind = if self.state.lock().roots.contains(parent_id) {
            ParentKind::Root
        } else {
            ParentKind::OrganizationalUnit
        };
        ParentRef { id: parent_id.to_string(), kind }
    }

    fn record_call(&self, operation: MockOperation) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_insert(0) += 1;

        if state.permanent_failures.contains(&operation) {
            return Err(SourceError::permanent(operation.name(), "injected failure"));
        }
        if let Some(remaining) = state.transient_failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::transient(operation.name(), "injected throttling"));
            }
        }
        Ok(())
    }

    async fn call(&self, operation: MockOperation) -> Result<()> {
        self.record_call(operation)?;
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn list_entries(&self, cursor: Option<&str>) -> Result<EntryPage> {
        self.call(MockOperation::ListEntries).await?;

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SourceError::permanent("list_entries", format!("bad cursor {}", c)))?,
            None => 0,
        };

        let state = self.state.lock();
        let ids: Vec<String> = state
            .entries
            .keys()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = start + ids.len();
        let next_cursor = (next < state.entries.len()).then(|| next.to_string());

        Ok(EntryPage { ids, next_cursor })
    }

    async fn describe_entry(&self, id: &str) -> Result<EntryDetail> {
        self.call(MockOperation::DescribeEntry).await?;
        self.state
            .lock()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn list_tags(&self, id: &str) -> Result<TagSet> {
        self.call(MockOperation::ListTags).await?;
        Ok(self.state.lock().tags.get(id).cloned().unwrap_or_default())
    }

    async fn parent_of(&self, id: &str) -> Result<Option<ParentRef>> {
        self.call(MockOperation::ParentOf).await?;
        Ok(self.state.lock().parents.get(id).cloned())
    }
}

/// Hands every caller the same shared [`MockDirectory`]
pub struct MockConnector {
    directory: Arc<MockDirectory>,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new(directory: Arc<MockDirectory>) -> Self {
        Self {
            directory,
            connects: AtomicU32::new(0),
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryConnector for MockConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn DirectoryClient>> {
        if credentials.is_expired() {
            return Err(SourceError::Authorization("credentials expired".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn DirectoryClient> = self.directory.clone();
        Ok(client)
    }
}

/// Issues throwaway credentials, or refuses when told to
pub struct MockCredentialBroker {
    reject: AtomicBool,
    calls: AtomicU32,
}

impl Default for MockCredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCredentialBroker {
    pub fn new() -> Self {
        Self {
            reject: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting() -> Self {
        let broker = Self::new();
        broker.set_reject(true);
        broker
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialBroker for MockCredentialBroker {
    async fn assume(&self) -> Result<Credentials> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject.load(Ordering::SeqCst) {
            return Err(SourceError::Authorization(
                "external id does not match the trust policy".to_string(),
            ));
        }
        Ok(Credentials::new(
            format!("ASIAMOCK{:08}", n),
            "mock-secret",
            "mock-session-token",
            None,
        ))
    }
}
