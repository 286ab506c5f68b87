//! Per-entry write path: fresh credentials, full detail fetch, upsert.

use std::sync::Arc;

use chrono::Utc;
use oc_cache::{CacheStore, CachedRecord};
use oc_common::WorkUnit;
use oc_source::{CredentialBroker, DirectoryConnector, OrgTreeCrawler, RetryPolicy};
use tracing::debug;

use crate::Result;

/// Turns one work unit into one upserted cache record.
///
/// Nothing is written unless every source call succeeds; retrying the unit is left to queue
/// redelivery.
pub struct CacheWriter {
    broker: Arc<dyn CredentialBroker>,
    connector: Arc<dyn DirectoryConnector>,
    store: Arc<dyn CacheStore>,
    retry: RetryPolicy,
}

impl CacheWriter {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        connector: Arc<dyn DirectoryConnector>,
        store: Arc<dyn CacheStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            connector,
            store,
            retry,
        }
    }

    pub async fn process(&self, unit: &WorkUnit) -> Result<CachedRecord> {
        let credentials = self.broker.assume().await?;
        let client = self.connector.connect(&credentials).await?;
        let crawler = OrgTreeCrawler::new(client, self.retry.clone());

        let entry = crawler.fetch_entry(&unit.id).await?;
        let record = CachedRecord::from_entry(&entry, Utc::now())?;

        self.store.upsert(record.clone()).await?;
        debug!(
            entry_id = %record.id,
            depth = entry.ou_path.len(),
            tags = entry.tags.len(),
            "Cache record written"
        );
        Ok(record)
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}
