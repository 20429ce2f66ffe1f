//! Core data models used throughout Memory Harness.
//!
//! These types represent the files, chunks, and search results that flow
//! through the indexing and retrieval pipeline.

use serde::Serialize;

/// Source tag stored on every chunk and reported on every search result.
pub const MEMORY_SOURCE: &str = "memory";

/// A contiguous slice of one file's text, produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// First line of the slice (1-based, inclusive).
    pub start_line: i64,
    /// Last line of the slice (1-based, inclusive).
    pub end_line: i64,
    pub text: String,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

/// Tracked state for one indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Workspace-relative path with `/` separators.
    pub path: String,
    /// SHA-256 hex digest of the whole file.
    pub hash: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    pub size: i64,
}

/// A persisted chunk: a [`MemoryChunk`] bound to a file and an embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Stable id derived from `path:start-end`.
    pub id: String,
    pub path: String,
    pub source: String,
    pub start_line: i64,
    pub end_line: i64,
    pub hash: String,
    /// Embedding model that produced `embedding`.
    pub model: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: i64,
}

/// A ranked, citable search hit. Built fresh for every query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    /// Fused hybrid score.
    pub score: f64,
    pub snippet: String,
    pub source: String,
    /// `path#Lstart-Lend`.
    pub citation: String,
}

/// Progress update delivered after each file of a sync is processed or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

/// Counts produced by one completed sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Files that were (re-)chunked and written.
    pub indexed: usize,
    /// Files removed because they no longer exist.
    pub removed: usize,
    /// Chunks written across all indexed files.
    pub chunks: usize,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
