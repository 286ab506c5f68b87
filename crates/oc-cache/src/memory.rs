use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{CacheError, CacheStore, CachedRecord, IndexKey, Result};

/// Cache store held in a map, for tests and single-process runs
#[derive(Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<String, CachedRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filter<F>(&self, predicate: F) -> Vec<CachedRecord>
    where
        F: Fn(&CachedRecord) -> bool,
    {
        let mut matched: Vec<CachedRecord> = self
            .records
            .read()
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn upsert(&self, record: CachedRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CachedRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<CachedRecord>> {
        let records = self.records.read();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn query_index(&self, key: IndexKey, value: &str) -> Result<Vec<CachedRecord>> {
        if key.column().is_none() {
            return Err(CacheError::InvalidRecord(format!("no index {:?}", key)));
        }
        Ok(self.filter(|record| key.value_of(record) == Some(value)))
    }

    async fn scan_tags(&self, needles: &[String]) -> Result<Vec<CachedRecord>> {
        Ok(self.filter(|record| record.flattened_tags.is_some() && record.has_tags(needles)))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oc_common::DirectoryEntry;

    fn record(id: &str, status: &str, ou_path: &[&str]) -> CachedRecord {
        let entry = DirectoryEntry {
            id: id.to_string(),
            name: id.to_string(),
            status: status.to_string(),
            email_address: format!("{}@example.com", id),
            ou_path: ou_path.iter().map(|s| s.to_string()).collect(),
            tags: Default::default(),
        };
        CachedRecord::from_entry(&entry, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_whole_record() {
        let store = MemoryCacheStore::new();
        store.upsert(record("a", "ACTIVE", &["r", "ou-1"])).await.unwrap();
        store.upsert(record("a", "SUSPENDED", &["r"])).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, "SUSPENDED");
        assert_eq!(stored.ou_level(2), None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_index_exact_match() {
        let store = MemoryCacheStore::new();
        store.upsert(record("a", "ACTIVE", &["r", "ou-1"])).await.unwrap();
        store.upsert(record("b", "SUSPENDED", &["r", "ou-1"])).await.unwrap();
        store.upsert(record("c", "ACTIVE", &["r", "ou-2"])).await.unwrap();

        let active = store.query_index(IndexKey::Status, "ACTIVE").await.unwrap();
        assert_eq!(active.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);

        let in_ou = store.query_index(IndexKey::OuLevel(2), "ou-1").await.unwrap();
        assert_eq!(in_ou.len(), 2);

        assert!(store.query_index(IndexKey::OuLevel(3), "ou-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let store = MemoryCacheStore::new();
        store.upsert(record("x", "ACTIVE", &[])).await.unwrap();
        store.upsert(record("z", "ACTIVE", &[])).await.unwrap();

        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let found = store.get_many(&ids).await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
