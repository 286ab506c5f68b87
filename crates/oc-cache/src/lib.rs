//! Cache store for synchronized directory entries.
//!
//! Records are upserted wholesale by id. Besides the primary key, the store answers exact-match
//! lookups on `status`, `email_address` and each `ou_level1..5`, plus pair containment over the
//! flattened tags.

use std::sync::Arc;

use async_trait::async_trait;
use oc_common::MAX_OU_DEPTH;
use oc_config::CacheConfig;
use tracing::warn;

pub mod error;
pub mod memory;
pub mod record;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::CacheError;
pub use memory::MemoryCacheStore;
pub use record::CachedRecord;

pub type Result<T> = std::result::Result<T, CacheError>;

/// A secondary index of the cache store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Status,
    Email,
    /// 1-based ancestor depth
    OuLevel(usize),
}

impl IndexKey {
    /// Depth index for `depth`, if the store keeps one
    pub fn ou_level(depth: usize) -> Option<IndexKey> {
        (1..=MAX_OU_DEPTH).contains(&depth).then_some(IndexKey::OuLevel(depth))
    }

    /// Every depth index, shallowest first
    pub fn ou_levels() -> impl Iterator<Item = IndexKey> {
        (1..=MAX_OU_DEPTH).map(IndexKey::OuLevel)
    }

    pub fn column(&self) -> Option<&'static str> {
        match self {
            IndexKey::Status => Some("status"),
            IndexKey::Email => Some("email_address"),
            IndexKey::OuLevel(1) => Some("ou_level1"),
            IndexKey::OuLevel(2) => Some("ou_level2"),
            IndexKey::OuLevel(3) => Some("ou_level3"),
            IndexKey::OuLevel(4) => Some("ou_level4"),
            IndexKey::OuLevel(5) => Some("ou_level5"),
            IndexKey::OuLevel(_) => None,
        }
    }

    /// The record's value under this index
    pub fn value_of<'a>(&self, record: &'a CachedRecord) -> Option<&'a str> {
        match self {
            IndexKey::Status => Some(record.status.as_str()),
            IndexKey::Email => Some(record.email_address.as_str()),
            IndexKey::OuLevel(depth) => record.ou_level(*depth),
        }
    }
}

/// Keyed, multi-indexed persistent store of directory records
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or wholly replace the record with the same id
    async fn upsert(&self, record: CachedRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<CachedRecord>>;

    /// Records for whichever of `ids` exist; missing ids are skipped
    async fn get_many(&self, ids: &[String]) -> Result<Vec<CachedRecord>>;

    /// Exact match on one secondary index
    async fn query_index(&self, key: IndexKey, value: &str) -> Result<Vec<CachedRecord>>;

    /// Records whose flattened tags contain every needle as a complete pair
    async fn scan_tags(&self, needles: &[String]) -> Result<Vec<CachedRecord>>;

    async fn count(&self) -> Result<u64>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Open the store `config` names, creating the SQLite schema if needed
pub async fn create_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match config.cache_type.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&config.sqlite_url)
                .await?;
            let store = sqlite::SqliteCacheStore::new(pool);
            store.init_schema().await?;
            tracing::info!(url = %config.sqlite_url, "SQLite cache ready");
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("Memory cache lives only in this process and starts empty");
            Ok(Arc::new(MemoryCacheStore::new()))
        }
        other => Err(CacheError::Unsupported(other.to_string())),
    }
}
