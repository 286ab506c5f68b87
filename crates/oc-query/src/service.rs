//! One resolver for every read pattern.

use std::collections::HashSet;
use std::sync::Arc;

use oc_cache::{CacheStore, CachedRecord, IndexKey};
use oc_common::{DirectoryEntry, MAX_OU_DEPTH};
use tracing::{debug, warn};

use crate::query::{Lookup, MatchMode, Query, QueryPlan};
use crate::{QueryError, Result};

/// Result of a read: entries, or an explicit "nothing matched"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Found(Vec<DirectoryEntry>),
    NoResults,
}

impl QueryOutcome {
    pub fn entries(&self) -> &[DirectoryEntry] {
        match self {
            QueryOutcome::Found(entries) => entries,
            QueryOutcome::NoResults => &[],
        }
    }

    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        match self {
            QueryOutcome::Found(entries) => entries,
            QueryOutcome::NoResults => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, QueryOutcome::NoResults)
    }
}

/// Read-only view over the cache store
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn CacheStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, query: Query) -> Result<QueryOutcome> {
        let kind = query.kind();
        metrics::counter!("orgcache.query.requests_total", "kind" => kind).increment(1);

        let plan = query.plan()?;
        let records = self.execute(&plan).await?;
        let outcome = Self::into_outcome(records)?;

        debug!(
            kind = kind,
            values = plan.values.len(),
            matched = outcome.entries().len(),
            "Query resolved"
        );
        if outcome.is_empty() {
            metrics::counter!("orgcache.query.empty_total", "kind" => kind).increment(1);
        }
        Ok(outcome)
    }

    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<CachedRecord>> {
        match (plan.lookup, plan.mode) {
            (Lookup::PrimaryKey, MatchMode::Exact) => Ok(self.store.get_many(&plan.values).await?),
            (Lookup::Index(key), MatchMode::Exact) => {
                let mut records = Vec::new();
                for value in &plan.values {
                    records.extend(self.store.query_index(key, value).await?);
                }
                Ok(records)
            }
            (Lookup::OuLevels, MatchMode::Subtree) => {
                let mut records = Vec::new();
                for unit in &plan.values {
                    records.extend(self.subtree(unit).await?);
                }
                Ok(dedupe(records))
            }
            (Lookup::FlattenedTags, MatchMode::Containment) => {
                Ok(self.store.scan_tags(&plan.values).await?)
            }
            (lookup, mode) => Err(QueryError::input(format!(
                "{:?} cannot be matched by {:?}",
                lookup, mode
            ))),
        }
    }

    /// Every entry at or below `unit`.
    ///
    /// The shallowest depth index that knows `unit` fixes its depth; that index and every
    /// deeper one are then unioned.
    async fn subtree(&self, unit: &str) -> Result<Vec<CachedRecord>> {
        for depth in 1..=MAX_OU_DEPTH {
            let found = self.store.query_index(IndexKey::OuLevel(depth), unit).await?;
            if found.is_empty() {
                continue;
            }

            let mut records = found;
            let anchored: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
            for deeper in (depth + 1)..=MAX_OU_DEPTH {
                let extra = self.store.query_index(IndexKey::OuLevel(deeper), unit).await?;
                if extra.iter().any(|r| !anchored.contains(&r.id)) {
                    // Ids are assumed unique across depths; a hit here merges unrelated branches
                    warn!(
                        unit = %unit,
                        depth = depth,
                        also_at = deeper,
                        "Unit id appears at more than one depth"
                    );
                }
                records.extend(extra);
            }
            return Ok(records);
        }
        Ok(Vec::new())
    }

    fn into_outcome(records: Vec<CachedRecord>) -> Result<QueryOutcome> {
        if records.is_empty() {
            return Ok(QueryOutcome::NoResults);
        }
        let entries = records
            .iter()
            .map(CachedRecord::to_entry)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(QueryOutcome::Found(entries))
    }

    pub async fn by_ids(&self, ids: Vec<String>) -> Result<QueryOutcome> {
        self.resolve(Query::ByIds(ids)).await
    }

    pub async fn by_emails(&self, emails: Vec<String>) -> Result<QueryOutcome> {
        self.resolve(Query::ByEmails(emails)).await
    }

    pub async fn by_status(&self, status: impl Into<String>) -> Result<QueryOutcome> {
        self.resolve(Query::ByStatus(status.into())).await
    }

    pub async fn by_ous(&self, ous: Vec<String>) -> Result<QueryOutcome> {
        self.resolve(Query::ByOus(ous)).await
    }

    pub async fn by_tag(&self, name: impl Into<String>, value: impl Into<String>) -> Result<QueryOutcome> {
        self.resolve(Query::ByTag { name: name.into(), value: value.into() }).await
    }

    pub async fn by_tags(&self, tags: oc_common::TagSet) -> Result<QueryOutcome> {
        self.resolve(Query::ByTags(tags)).await
    }

    /// Whether the backing store can currently serve reads
    pub async fn is_ready(&self) -> bool {
        self.store.is_healthy() && self.store.count().await.is_ok()
    }
}

fn dedupe(records: Vec<CachedRecord>) -> Vec<CachedRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect()
}
