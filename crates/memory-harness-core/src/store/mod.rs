//! Storage abstraction for Memory Harness.
//!
//! The [`MemoryStore`] trait defines every storage operation needed by the
//! indexer, the embedding cache, and hybrid search, so those pipelines are
//! written once and run against any backend (SQLite in the app crate,
//! [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkRecord, FileRecord};

/// A chunk returned by vector or keyword ranking.
///
/// `score` is already mapped into `[0, 1]` by the backend: cosine
/// similarity for vector hits, a squashed relevance rank for keyword hits.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub id: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub source: String,
    pub score: f64,
}

/// A freshly computed vector destined for the embedding cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// Abstract storage backend for Memory Harness.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`init_schema`](MemoryStore::init_schema) | Create tables for a vector width (idempotent) |
/// | [`replace_file`](MemoryStore::replace_file) | Upsert a file and swap its chunks atomically |
/// | [`delete_file`](MemoryStore::delete_file) | Remove a file; its chunks cascade |
/// | [`load_cached_embeddings`](MemoryStore::load_cached_embeddings) | Cache lookup by content hash |
/// | [`store_cached_embeddings`](MemoryStore::store_cached_embeddings) | Cache upsert |
/// | [`evict_cached_embeddings`](MemoryStore::evict_cached_embeddings) | Bound cache size |
/// | [`vector_search`](MemoryStore::vector_search) | Cosine similarity ranking |
/// | [`keyword_search`](MemoryStore::keyword_search) | Lexical relevance ranking |
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Create the schema for vectors of width `dims`.
    ///
    /// # Errors
    ///
    /// Fails if the store was previously initialized with a different width.
    async fn init_schema(&self, dims: usize) -> Result<()>;

    /// Stored content hash for `path`, if the file is indexed.
    async fn file_hash(&self, path: &str) -> Result<Option<String>>;

    /// Paths of every indexed file.
    async fn file_paths(&self) -> Result<Vec<String>>;

    /// Upsert `file` and replace all of its chunks in one transaction.
    async fn replace_file(&self, file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()>;

    /// Remove a file record together with its chunks.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Look up cached vectors for `hashes` under `(provider, model)`.
    ///
    /// Missing and undecodable entries are simply absent from the map.
    async fn load_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>>;

    /// Upsert vectors into the cache, all-or-nothing.
    async fn store_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        entries: &[CacheEntry],
    ) -> Result<()>;

    /// Delete the oldest cache rows until at most `max_entries` remain.
    ///
    /// Returns the number of rows removed.
    async fn evict_cached_embeddings(&self, max_entries: usize) -> Result<usize>;

    /// Rank chunks by cosine similarity to `query_vec`.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkHit>>;

    /// Rank chunks by lexical relevance to a natural-language `query`.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    async fn count_files(&self) -> Result<usize>;

    async fn count_chunks(&self) -> Result<usize>;

    async fn count_cached_embeddings(&self) -> Result<usize>;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}
