//! SQLite-backed [`MemoryStore`] implementation.
//!
//! Vectors live in `chunks.embedding` as little-endian f32 BLOBs and are
//! ranked by brute-force cosine similarity in Rust. Lexical ranking uses
//! the `chunks_fts` FTS5 table and its BM25 rank.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use memory_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use memory_harness_core::models::{ChunkRecord, FileRecord};
use memory_harness_core::search::{lexical_terms, squash_relevance};
use memory_harness_core::store::{CacheEntry, ChunkHit, MemoryStore};

use crate::cache::EmbeddingCache;
use crate::migrate;

/// SQLite implementation of the [`MemoryStore`] trait.
///
/// Wraps a [`SqlitePool`] shared by every component; no operation holds a
/// connection beyond a single statement or transaction.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn cache(&self) -> EmbeddingCache<'_> {
        EmbeddingCache::new(&self.pool)
    }
}

/// Build an FTS5 MATCH expression requiring every word of `query`.
///
/// Each term is double-quoted, so operators and punctuation typed by the
/// user are never interpreted as FTS syntax. Returns `None` when the query
/// has no words.
pub fn build_fts_query(query: &str) -> Option<String> {
    let terms = lexical_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn init_schema(&self, dims: usize) -> Result<()> {
        migrate::init_schema(&self.pool, dims).await
    }

    async fn file_hash(&self, path: &str) -> Result<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar("SELECT hash FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hash)
    }

    async fn file_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    async fn replace_file(&self, file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (path, hash, mtime, size)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                mtime = excluded.mtime,
                size = excluded.size
            "#,
        )
        .bind(&file.path)
        .bind(&file.hash)
        .bind(file.mtime)
        .bind(file.size)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE path = ?")
            .bind(&file.path)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(&file.path)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let blob = chunk.embedding.as_deref().map(vec_to_blob);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, path, source, start_line, end_line, hash, model, text, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    source = excluded.source,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    hash = excluded.hash,
                    model = excluded.model,
                    text = excluded.text,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.path)
            .bind(&chunk.source)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(&chunk.hash)
            .bind(&chunk.model)
            .bind(&chunk.text)
            .bind(blob)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, path, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.path)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        // chunks cascade
        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        self.cache().load(provider, model, hashes).await
    }

    async fn store_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        entries: &[CacheEntry],
    ) -> Result<()> {
        self.cache().store(provider, model, entries).await
    }

    async fn evict_cached_embeddings(&self, max_entries: usize) -> Result<usize> {
        self.cache().evict(max_entries).await
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, source, start_line, end_line, text, embedding
            FROM chunks
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ChunkHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let Some(vec) = blob_to_vec(&blob) else {
                let id: String = row.get("id");
                debug!(chunk = %id, "skipping undecodable chunk embedding");
                continue;
            };
            let sim = cosine_similarity(query_vec, &vec) as f64;
            hits.push(ChunkHit {
                id: row.get("id"),
                path: row.get("path"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                text: row.get("text"),
                source: row.get("source"),
                score: sim.clamp(0.0, 1.0),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.source, c.start_line, c.end_line, c.text,
                   bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkHit {
                    id: row.get("id"),
                    path: row.get("path"),
                    start_line: row.get("start_line"),
                    end_line: row.get("end_line"),
                    text: row.get("text"),
                    source: row.get("source"),
                    // bm25() is negative; more negative is more relevant.
                    score: squash_relevance(-rank),
                }
            })
            .collect())
    }

    async fn count_files(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn count_chunks(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn count_cached_embeddings(&self) -> Result<usize> {
        self.cache().count().await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
