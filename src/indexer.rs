//! Memory sync pipeline.
//!
//! Discovers the workspace's memory files, detects which changed since the
//! last run, and brings the store in line with the filesystem:
//!
//! ```text
//! list files → hash → (unchanged? skip) → chunk → cache lookup
//!     → embed misses (one batch per file) → cache store → replace_file
//! then: delete stale paths → evict cache once
//! ```
//!
//! Each file commits in its own transaction. A failure aborts the sync at
//! that file; files committed earlier in the same run stay valid, and the
//! next sync skips them by hash.
//!
//! # Memory File Convention
//!
//! - `MEMORY.md` and `memory.md` at the workspace root (indexed once if
//!   they are the same file on a case-insensitive filesystem)
//! - every `*.md` directly inside `memory/`

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use memory_harness_core::chunk::{chunk_markdown, hash_text, ChunkingParams};
use memory_harness_core::embedding::EmbeddingProvider;
use memory_harness_core::models::{
    now_ms, ChunkRecord, FileRecord, MemoryChunk, SyncProgress, SyncSummary, MEMORY_SOURCE,
};
use memory_harness_core::store::{CacheEntry, MemoryStore};

use crate::config::CacheConfig;
use crate::progress::SyncProgressReporter;

/// Root-level memory file names, in lookup order.
pub const ROOT_MEMORY_FILES: [&str; 2] = ["MEMORY.md", "memory.md"];

/// Directory of additional memory notes.
pub const MEMORY_DIR: &str = "memory";

/// A memory file read from disk, ready for change detection.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub record: FileRecord,
    pub content: String,
}

pub struct IndexOptions<'a> {
    /// Re-index files even when their hash is unchanged.
    pub force: bool,
    pub chunking: ChunkingParams,
    pub cache: CacheConfig,
    pub progress: Option<&'a dyn SyncProgressReporter>,
}

/// List the workspace's memory files as absolute paths.
///
/// Root files come first, then `memory/*.md` sorted by name. Missing files
/// and a missing `memory/` directory are not errors.
pub fn list_memory_files(workspace: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for name in ROOT_MEMORY_FILES {
        let path = workspace.join(name);
        if !path.is_file() {
            continue;
        }
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if seen.insert(canonical) {
            files.push(path);
        }
    }

    let dir = workspace.join(MEMORY_DIR);
    if dir.is_dir() {
        let mut notes = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry =
                entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
            let path = entry.path();
            let is_md = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if entry.file_type().is_file() && is_md {
                notes.push(path.to_path_buf());
            }
        }
        notes.sort();
        files.extend(notes);
    }

    Ok(files)
}

/// Read `abs_path` and compute its [`FileRecord`].
///
/// Returns `None` when the file vanished after it was listed. Bytes that are
/// not valid UTF-8 are decoded lossily.
pub fn build_file_entry(workspace: &Path, abs_path: &Path) -> Result<Option<FileEntry>> {
    let bytes = match std::fs::read(abs_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", abs_path.display()))
        }
    };
    let metadata = match std::fs::metadata(abs_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", abs_path.display()))
        }
    };
    let content = String::from_utf8_lossy(&bytes).into_owned();

    let mtime = metadata
        .modified()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
        .unwrap_or(0);

    Ok(Some(FileEntry {
        abs_path: abs_path.to_path_buf(),
        record: FileRecord {
            path: relative_path(workspace, abs_path)?,
            hash: hash_text(&content),
            mtime,
            size: metadata.len() as i64,
        },
        content,
    }))
}

/// Workspace-relative path with `/` separators on every platform.
pub fn relative_path(workspace: &Path, abs_path: &Path) -> Result<String> {
    let rel = abs_path.strip_prefix(workspace).with_context(|| {
        format!(
            "{} is outside workspace {}",
            abs_path.display(),
            workspace.display()
        )
    })?;

    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Chunk ids of the form `path:start-end`.
///
/// Hard-split lines can yield several chunks with one line range; the
/// second and later ones get a `~n` suffix so each id stays unique.
pub fn chunk_ids(path: &str, chunks: &[MemoryChunk]) -> Vec<String> {
    let mut seen: HashMap<(i64, i64), usize> = HashMap::new();
    chunks
        .iter()
        .map(|c| {
            let n = seen.entry((c.start_line, c.end_line)).or_insert(0);
            *n += 1;
            if *n == 1 {
                format!("{}:{}-{}", path, c.start_line, c.end_line)
            } else {
                format!("{}:{}-{}~{}", path, c.start_line, c.end_line, n)
            }
        })
        .collect()
}

/// Bring the store in line with the workspace's memory files.
///
/// # Errors
///
/// Provider and storage failures abort the run at the failing file, with
/// the file's path in the error context.
pub async fn sync_memory_files(
    store: &dyn MemoryStore,
    provider: &dyn EmbeddingProvider,
    workspace: &Path,
    opts: &IndexOptions<'_>,
) -> Result<SyncSummary> {
    let files = list_memory_files(workspace)?;
    let total = files.len();
    let mut active: HashSet<String> = HashSet::with_capacity(total);
    let mut summary = SyncSummary::default();

    for (i, abs_path) in files.iter().enumerate() {
        let Some(entry) = build_file_entry(workspace, abs_path)? else {
            debug!(path = %abs_path.display(), "vanished before read, skipping");
            continue;
        };
        let path = entry.record.path.clone();
        active.insert(path.clone());

        let stored_hash = store.file_hash(&path).await?;
        let label = if !opts.force && stored_hash.as_deref() == Some(entry.record.hash.as_str()) {
            debug!(path = %path, "unchanged, skipping");
            format!("skip {}", path)
        } else {
            let written = index_file(store, provider, &entry, opts)
                .await
                .with_context(|| format!("Failed to index {}", path))?;
            summary.indexed += 1;
            summary.chunks += written;
            format!("indexed {} ({} chunks)", path, written)
        };

        if let Some(progress) = opts.progress {
            progress.report(&SyncProgress {
                completed: i + 1,
                total,
                label,
            });
        }
    }

    for path in store.file_paths().await? {
        if !active.contains(&path) {
            store
                .delete_file(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path))?;
            debug!(path = %path, "removed stale file");
            summary.removed += 1;
        }
    }

    if opts.cache.enabled {
        let evicted = store
            .evict_cached_embeddings(opts.cache.max_entries)
            .await?;
        if evicted > 0 {
            info!(evicted, "evicted cached embeddings");
        }
    }

    if summary.indexed > 0 || summary.removed > 0 {
        info!(
            indexed = summary.indexed,
            removed = summary.removed,
            chunks = summary.chunks,
            "memory sync complete"
        );
    }

    Ok(summary)
}

/// Chunk, embed, and write one file. Returns the number of chunks written.
async fn index_file(
    store: &dyn MemoryStore,
    provider: &dyn EmbeddingProvider,
    entry: &FileEntry,
    opts: &IndexOptions<'_>,
) -> Result<usize> {
    let chunks = chunk_markdown(&entry.content, opts.chunking);
    let provider_id = provider.id();
    let model = provider.model_name();

    let mut vectors: HashMap<String, Vec<f32>> = if opts.cache.enabled {
        let hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
        store
            .load_cached_embeddings(provider_id, model, &hashes)
            .await?
    } else {
        HashMap::new()
    };

    let mut missing: Vec<&MemoryChunk> = Vec::new();
    let mut queued: HashSet<&str> = HashSet::new();
    for chunk in &chunks {
        if !vectors.contains_key(&chunk.hash) && queued.insert(chunk.hash.as_str()) {
            missing.push(chunk);
        }
    }

    if !missing.is_empty() {
        let texts: Vec<String> = missing.iter().map(|c| c.text.clone()).collect();
        let embedded = provider.embed_batch(&texts).await?;
        if embedded.len() != texts.len() {
            bail!(
                "provider {} returned {} embeddings for {} chunks",
                provider_id,
                embedded.len(),
                texts.len()
            );
        }
        check_dims(provider, &embedded)?;
        debug!(
            path = %entry.record.path,
            cached = chunks.len() - missing.len(),
            embedded = missing.len(),
            "embedded chunks"
        );

        let fresh: Vec<CacheEntry> = missing
            .iter()
            .zip(embedded)
            .map(|(chunk, embedding)| CacheEntry {
                hash: chunk.hash.clone(),
                embedding,
            })
            .collect();

        if opts.cache.enabled {
            store
                .store_cached_embeddings(provider_id, model, &fresh)
                .await?;
        }
        for e in fresh {
            vectors.insert(e.hash, e.embedding);
        }
    }

    let path = &entry.record.path;
    // Cache hits written under an older width are rejected here too.
    let resolved: Vec<Vec<f32>> = chunks
        .iter()
        .filter_map(|c| vectors.get(&c.hash).cloned())
        .collect();
    check_dims(provider, &resolved)?;

    let updated_at = now_ms();
    let records: Vec<ChunkRecord> = chunk_ids(path, &chunks)
        .into_iter()
        .zip(&chunks)
        .map(|(id, chunk)| ChunkRecord {
            id,
            path: path.clone(),
            source: MEMORY_SOURCE.to_string(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            hash: chunk.hash.clone(),
            model: model.to_string(),
            text: chunk.text.clone(),
            embedding: vectors.get(&chunk.hash).cloned(),
            updated_at,
        })
        .collect();

    store.replace_file(&entry.record, &records).await?;
    Ok(records.len())
}

/// Every vector must match the width the index was created for.
pub fn check_dims(provider: &dyn EmbeddingProvider, vectors: &[Vec<f32>]) -> Result<()> {
    let expected = provider.dims();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        bail!(
            "provider {} returned a {}-dimensional embedding, expected {}",
            provider.id(),
            bad.len(),
            expected
        );
    }
    Ok(())
}
