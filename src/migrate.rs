//! Schema creation and teardown for the SQLite memory index.
//!
//! | Table | Key | Purpose |
//! |-------|-----|---------|
//! | `meta` | `key` | index-wide settings (`vector_dims`) |
//! | `files` | `path` | one row per indexed file |
//! | `chunks` | `id` | chunk text + embedding BLOB, cascades from `files` |
//! | `chunks_fts` | rowid | FTS5 index over chunk text |
//! | `embedding_cache` | `(provider, model, hash)` | vectors reused across files and runs |

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const DIMS_KEY: &str = "vector_dims";

/// Connect using `config` and create the schema for `dims`-wide vectors.
pub async fn run_migrations(config: &Config, dims: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = init_schema(&pool, dims).await;
    pool.close().await;
    result
}

/// Create every table and index if missing. Idempotent.
///
/// # Errors
///
/// Fails when the database was initialized for a different vector width;
/// run `mem reset` to start over with the new provider.
pub async fn init_schema(pool: &SqlitePool, dims: usize) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            size INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
            source TEXT NOT NULL DEFAULT 'memory',
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, model, hash)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&mut *tx)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                path UNINDEXED,
                text,
                tokenize = 'porter unicode61'
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedding_cache_created_at ON embedding_cache(created_at)",
    )
    .execute(&mut *tx)
    .await?;

    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(DIMS_KEY)
        .fetch_optional(&mut *tx)
        .await?;

    match stored {
        Some(value) => {
            if value.parse::<usize>().ok() != Some(dims) {
                bail!(
                    "index was created for {}-dimensional vectors but the embedding provider produces {}; run `mem reset` to rebuild it",
                    value,
                    dims
                );
            }
        }
        None => {
            sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
                .bind(DIMS_KEY)
                .bind(dims.to_string())
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Drop every memory table. The next [`init_schema`] starts from scratch.
pub async fn drop_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in ["chunks_fts", "chunks", "files", "embedding_cache", "meta"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
