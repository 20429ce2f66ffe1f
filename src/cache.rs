//! Persistent embedding cache keyed by `(provider, model, content hash)`.
//!
//! Identical chunk text embeds once per provider/model no matter how many
//! files contain it or how often they are re-indexed. Entries are scoped by
//! provider and model, so switching either never returns a foreign vector.
//!
//! Size is bounded by [`EmbeddingCache::evict`], which the indexer runs once
//! per sync: when the table holds more than `max_entries` rows the oldest
//! rows by insertion time are deleted.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use memory_harness_core::embedding::{blob_to_vec, vec_to_blob};
use memory_harness_core::models::now_ms;
use memory_harness_core::store::CacheEntry;

/// Hashes per lookup query, keeping well under SQLite's bound-parameter limit.
pub const LOOKUP_BATCH_SIZE: usize = 500;

/// Embedding cache operations over the `embedding_cache` table.
pub struct EmbeddingCache<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EmbeddingCache<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch cached vectors for `hashes`.
    ///
    /// Hashes are queried in batches of [`LOOKUP_BATCH_SIZE`]. Rows whose
    /// BLOB does not decode are left out, so the caller re-embeds them.
    pub async fn load(
        &self,
        provider: &str,
        model: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();

        for batch in hashes.chunks(LOOKUP_BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT hash, embedding FROM embedding_cache WHERE provider = ",
            );
            qb.push_bind(provider);
            qb.push(" AND model = ");
            qb.push_bind(model);
            qb.push(" AND hash IN (");
            let mut separated = qb.separated(", ");
            for hash in batch {
                separated.push_bind(hash.as_str());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(self.pool).await?;
            for row in rows {
                let hash: String = row.get("hash");
                let blob: Vec<u8> = row.get("embedding");
                match blob_to_vec(&blob) {
                    Some(vec) => {
                        found.insert(hash, vec);
                    }
                    None => debug!(hash = %hash, "skipping undecodable cached embedding"),
                }
            }
        }

        Ok(found)
    }

    /// Upsert `entries` in a single transaction.
    ///
    /// Either every entry is written or, on error, none are.
    pub async fn store(&self, provider: &str, model: &str, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO embedding_cache (provider, model, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(provider, model, hash) DO UPDATE SET
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(provider)
            .bind(model)
            .bind(&entry.hash)
            .bind(vec_to_blob(&entry.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete the oldest rows beyond `max_entries`; returns how many went.
    pub async fn evict(&self, max_entries: usize) -> Result<usize> {
        let count = self.count().await?;
        if count <= max_entries {
            return Ok(0);
        }

        let excess = count - max_entries;
        let result = sqlx::query(
            r#"
            DELETE FROM embedding_cache WHERE rowid IN (
                SELECT rowid FROM embedding_cache
                ORDER BY created_at ASC, rowid ASC
                LIMIT ?
            )
            "#,
        )
        .bind(excess as i64)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("cache.sqlite"))
            .await
            .unwrap();
        migrate::init_schema(&pool, 3).await.unwrap();
        (tmp, pool)
    }

    fn entry(hash: &str, v: f32) -> CacheEntry {
        CacheEntry {
            hash: hash.to_string(),
            embedding: vec![v, 0.5, -v],
        }
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        cache
            .store("openai", "m1", &[entry("a", 0.25), entry("b", 1.0)])
            .await
            .unwrap();

        let found = cache
            .load("openai", "m1", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], vec![0.25, 0.5, -0.25]);
    }

    #[tokio::test]
    async fn test_scoped_by_provider_and_model() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        cache.store("openai", "m1", &[entry("a", 1.0)]).await.unwrap();

        let keys = vec!["a".to_string()];
        assert!(cache.load("ollama", "m1", &keys).await.unwrap().is_empty());
        assert!(cache.load("openai", "m2", &keys).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        cache.store("p", "m", &[entry("a", 1.0)]).await.unwrap();
        cache.store("p", "m", &[entry("a", 2.0)]).await.unwrap();

        assert_eq!(cache.count().await.unwrap(), 1);
        let found = cache.load("p", "m", &["a".to_string()]).await.unwrap();
        assert_eq!(found["a"][0], 2.0);
    }

    #[tokio::test]
    async fn test_load_spans_multiple_batches() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        let entries: Vec<CacheEntry> = (0..1200).map(|i| entry(&format!("h{}", i), i as f32)).collect();
        cache.store("p", "m", &entries).await.unwrap();

        let hashes: Vec<String> = entries.iter().map(|e| e.hash.clone()).collect();
        let found = cache.load("p", "m", &hashes).await.unwrap();
        assert_eq!(found.len(), 1200);
    }

    #[tokio::test]
    async fn test_malformed_blob_is_a_miss() {
        let (_tmp, pool) = setup().await;
        sqlx::query(
            "INSERT INTO embedding_cache (provider, model, hash, embedding, created_at) VALUES ('p', 'm', 'bad', ?, 0)",
        )
        .bind(vec![1u8, 2, 3])
        .execute(&pool)
        .await
        .unwrap();

        let cache = EmbeddingCache::new(&pool);
        let found = cache.load("p", "m", &["bad".to_string()]).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_evict_retains_most_recent() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        for i in 0..10 {
            cache
                .store("p", "m", &[entry(&format!("h{}", i), i as f32)])
                .await
                .unwrap();
        }

        assert_eq!(cache.evict(4).await.unwrap(), 6);
        assert_eq!(cache.count().await.unwrap(), 4);

        let hashes: Vec<String> = (0..10).map(|i| format!("h{}", i)).collect();
        let found = cache.load("p", "m", &hashes).await.unwrap();
        let mut kept: Vec<&String> = found.keys().collect();
        kept.sort();
        assert_eq!(kept, vec!["h6", "h7", "h8", "h9"]);
    }

    #[tokio::test]
    async fn test_evict_under_limit_is_noop() {
        let (_tmp, pool) = setup().await;
        let cache = EmbeddingCache::new(&pool);
        cache.store("p", "m", &[entry("a", 1.0)]).await.unwrap();
        assert_eq!(cache.evict(10).await.unwrap(), 0);
    }
}
