use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use oc_common::MAX_OU_DEPTH;

use crate::record::bounded;
use crate::{CacheError, CacheStore, CachedRecord, IndexKey, Result};

/// Keeps each IN list well below SQLite's bound-parameter limit
const MAX_IDS_PER_QUERY: usize = 100;

const SELECT_COLUMNS: &str = "id, name, status, email_address, ou_level1, ou_level2, ou_level3, \
                              ou_level4, ou_level5, flattened_tags, synced_at";

/// SQLite-backed cache store
pub struct SqliteCacheStore {
    pool: Pool<Sqlite>,
}

impl SqliteCacheStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS directory_entries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                email_address TEXT NOT NULL,
                ou_level1 TEXT,
                ou_level2 TEXT,
                ou_level3 TEXT,
                ou_level4 TEXT,
                ou_level5 TEXT,
                flattened_tags TEXT,
                synced_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for column in ["status", "email_address", "flattened_tags"]
            .into_iter()
            .chain(IndexKey::ou_levels().filter_map(|key| key.column()))
        {
            let statement = format!(
                "CREATE INDEX IF NOT EXISTS idx_directory_entries_{column} ON directory_entries ({column})"
            );
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        info!("SQLite cache schema initialized");
        Ok(())
    }

    fn build_in_clause(count: usize) -> String {
        let placeholders: Vec<&str> = (0..count).map(|_| "?").collect();
        placeholders.join(", ")
    }

    fn parse_row(row: &SqliteRow) -> Result<CachedRecord> {
        let synced_at_ms: i64 = row.get("synced_at");
        let synced_at = DateTime::from_timestamp_millis(synced_at_ms)
            .ok_or_else(|| CacheError::InvalidRecord(format!("bad synced_at {}", synced_at_ms)))?;

        let mut ou_levels: [Option<String>; MAX_OU_DEPTH] = Default::default();
        for (depth, slot) in ou_levels.iter_mut().enumerate() {
            *slot = row.get(format!("ou_level{}", depth + 1).as_str());
        }

        Ok(CachedRecord {
            id: row.get("id"),
            name: row.get("name"),
            status: row.get("status"),
            email_address: row.get("email_address"),
            ou_levels,
            flattened_tags: row.get("flattened_tags"),
            synced_at,
        })
    }

    fn parse_rows(rows: &[SqliteRow]) -> Result<Vec<CachedRecord>> {
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn upsert(&self, record: CachedRecord) -> Result<()> {
        let [l1, l2, l3, l4, l5] = &record.ou_levels;

        sqlx::query(
            r#"
            INSERT INTO directory_entries
                (id, name, status, email_address, ou_level1, ou_level2, ou_level3, ou_level4,
                 ou_level5, flattened_tags, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                email_address = excluded.email_address,
                ou_level1 = excluded.ou_level1,
                ou_level2 = excluded.ou_level2,
                ou_level3 = excluded.ou_level3,
                ou_level4 = excluded.ou_level4,
                ou_level5 = excluded.ou_level5,
                flattened_tags = excluded.flattened_tags,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.status)
        .bind(&record.email_address)
        .bind(l1)
        .bind(l2)
        .bind(l3)
        .bind(l4)
        .bind(l5)
        .bind(&record.flattened_tags)
        .bind(record.synced_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(entry_id = %record.id, "Upserted directory entry");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CachedRecord>> {
        let query = format!("SELECT {} FROM directory_entries WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<CachedRecord>> {
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let query = format!(
                "SELECT {} FROM directory_entries WHERE id IN ({})",
                SELECT_COLUMNS,
                Self::build_in_clause(chunk.len())
            );
            let mut q = sqlx::query(&query);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await?;
            records.extend(Self::parse_rows(&rows)?);
        }

        Ok(records)
    }

    async fn query_index(&self, key: IndexKey, value: &str) -> Result<Vec<CachedRecord>> {
        let column = key
            .column()
            .ok_or_else(|| CacheError::InvalidRecord(format!("no index {:?}", key)))?;

        let query = format!(
            "SELECT {} FROM directory_entries WHERE {} = ? ORDER BY id",
            SELECT_COLUMNS, column
        );
        let rows = sqlx::query(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        Self::parse_rows(&rows)
    }

    async fn scan_tags(&self, needles: &[String]) -> Result<Vec<CachedRecord>> {
        // instr() is case-sensitive and takes the needle literally, unlike LIKE
        let mut query = format!(
            "SELECT {} FROM directory_entries WHERE flattened_tags IS NOT NULL",
            SELECT_COLUMNS
        );
        for _ in needles {
            query.push_str(" AND instr(',' || flattened_tags || ',', ?) > 0");
        }
        query.push_str(" ORDER BY id");

        let mut q = sqlx::query(&query);
        for needle in needles {
            q = q.bind(bounded(needle));
        }
        let rows = q.fetch_all(&self.pool).await?;

        Self::parse_rows(&rows)
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM directory_entries")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as u64)
    }

    fn is_healthy(&self) -> bool {
        !self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oc_common::DirectoryEntry;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_store() -> SqliteCacheStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteCacheStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn record(id: &str, ou_path: &[&str], tags: &[(&str, &str)]) -> CachedRecord {
        let entry = DirectoryEntry {
            id: id.to_string(),
            name: format!("account {}", id),
            status: "ACTIVE".to_string(),
            email_address: format!("{}@example.com", id),
            ou_path: ou_path.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };
        CachedRecord::from_entry(&entry, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = create_test_store().await;
        let original = record("111", &["r-1", "ou-a"], &[("env", "prod")]);
        store.upsert(original.clone()).await.unwrap();

        let stored = store.get("111").await.unwrap().unwrap();
        assert!(stored.same_payload(&original));
        assert_eq!(store.get("222").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = create_test_store().await;
        store.upsert(record("111", &["r-1", "ou-a"], &[("env", "prod")])).await.unwrap();
        store.upsert(record("111", &["r-1"], &[])).await.unwrap();

        let stored = store.get("111").await.unwrap().unwrap();
        assert_eq!(stored.ou_level(2), None);
        assert_eq!(stored.flattened_tags, None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_many_and_index_queries() {
        let store = create_test_store().await;
        store.upsert(record("111", &["r-1", "ou-a"], &[])).await.unwrap();
        store.upsert(record("222", &["r-1", "ou-a", "ou-b"], &[])).await.unwrap();
        store.upsert(record("333", &["r-1"], &[])).await.unwrap();

        let ids = vec!["111".to_string(), "999".to_string(), "333".to_string()];
        assert_eq!(store.get_many(&ids).await.unwrap().len(), 2);

        let at_depth_two = store.query_index(IndexKey::OuLevel(2), "ou-a").await.unwrap();
        assert_eq!(at_depth_two.len(), 2);

        let by_email = store.query_index(IndexKey::Email, "333@example.com").await.unwrap();
        assert_eq!(by_email[0].id, "333");
    }

    #[tokio::test]
    async fn test_scan_tags_requires_every_pair() {
        let store = create_test_store().await;
        store.upsert(record("111", &[], &[("env", "prod"), ("team", "core")])).await.unwrap();
        store.upsert(record("222", &[], &[("env", "production")])).await.unwrap();
        store.upsert(record("333", &[], &[])).await.unwrap();

        let prod = store.scan_tags(&["env:prod".to_string()]).await.unwrap();
        assert_eq!(prod.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["111"]);

        let both = store
            .scan_tags(&["env:prod".to_string(), "team:core".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 1);

        let other = store
            .scan_tags(&["env:prod".to_string(), "team:other".to_string()])
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}
