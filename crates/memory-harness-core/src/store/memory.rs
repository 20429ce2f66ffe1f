//! In-memory [`MemoryStore`] implementation for tests and embedders.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over all stored vectors; keyword search
//! requires every query term to appear as a word in the chunk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{now_ms, ChunkRecord, FileRecord};
use crate::search::{lexical_terms, squash_relevance};

use super::{CacheEntry, ChunkHit, MemoryStore};

type CacheKey = (String, String, String);

struct StoredEmbedding {
    embedding: Vec<f32>,
    created_at: i64,
    seq: u64,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    dims: RwLock<Option<usize>>,
    files: RwLock<HashMap<String, FileRecord>>,
    chunks: RwLock<Vec<ChunkRecord>>,
    cache: RwLock<HashMap<CacheKey, StoredEmbedding>>,
    seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            dims: RwLock::new(None),
            files: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Snapshot of the chunks currently stored for `path`.
    pub fn chunks_for(&self, path: &str) -> Result<Vec<ChunkRecord>> {
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn to_hit(chunk: &ChunkRecord, score: f64) -> ChunkHit {
    ChunkHit {
        id: chunk.id.clone(),
        path: chunk.path.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        text: chunk.text.clone(),
        source: chunk.source.clone(),
        score,
    }
}

fn sort_and_truncate(hits: &mut Vec<ChunkHit>, limit: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn init_schema(&self, dims: usize) -> Result<()> {
        let mut current = write(&self.dims)?;
        match *current {
            Some(existing) if existing != dims => bail!(
                "index was created for {}-dimensional vectors, provider produces {}",
                existing,
                dims
            ),
            _ => *current = Some(dims),
        }
        Ok(())
    }

    async fn file_hash(&self, path: &str) -> Result<Option<String>> {
        Ok(read(&self.files)?.get(path).map(|f| f.hash.clone()))
    }

    async fn file_paths(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = read(&self.files)?.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    async fn replace_file(&self, file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()> {
        let mut files = write(&self.files)?;
        let mut stored = write(&self.chunks)?;
        files.insert(file.path.clone(), file.clone());
        stored.retain(|c| c.path != file.path);
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let mut files = write(&self.files)?;
        let mut stored = write(&self.chunks)?;
        files.remove(path);
        stored.retain(|c| c.path != path);
        Ok(())
    }

    async fn load_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let cache = read(&self.cache)?;
        let mut out = HashMap::new();
        for hash in hashes {
            let key = (provider.to_string(), model.to_string(), hash.clone());
            if let Some(entry) = cache.get(&key) {
                out.insert(hash.clone(), entry.embedding.clone());
            }
        }
        Ok(out)
    }

    async fn store_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        entries: &[CacheEntry],
    ) -> Result<()> {
        let mut cache = write(&self.cache)?;
        let created_at = now_ms();
        for entry in entries {
            let key = (provider.to_string(), model.to_string(), entry.hash.clone());
            // Upserts keep their original insertion slot, like a rowid.
            let seq = match cache.get(&key) {
                Some(existing) => existing.seq,
                None => self.seq.fetch_add(1, Ordering::SeqCst),
            };
            cache.insert(
                key,
                StoredEmbedding {
                    embedding: entry.embedding.clone(),
                    created_at,
                    seq,
                },
            );
        }
        Ok(())
    }

    async fn evict_cached_embeddings(&self, max_entries: usize) -> Result<usize> {
        let mut cache = write(&self.cache)?;
        if cache.len() <= max_entries {
            return Ok(0);
        }
        let excess = cache.len() - max_entries;
        let mut by_age: Vec<(i64, u64, CacheKey)> = cache
            .iter()
            .map(|(k, v)| (v.created_at, v.seq, k.clone()))
            .collect();
        by_age.sort();
        for (_, _, key) in by_age.into_iter().take(excess) {
            cache.remove(&key);
        }
        Ok(excess)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        let chunks = read(&self.chunks)?;
        let mut hits: Vec<ChunkHit> = chunks
            .iter()
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                let sim = cosine_similarity(query_vec, embedding) as f64;
                Some(to_hit(c, sim.clamp(0.0, 1.0)))
            })
            .collect();
        sort_and_truncate(&mut hits, limit);
        Ok(hits)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let terms = lexical_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = read(&self.chunks)?;
        let mut hits: Vec<ChunkHit> = chunks
            .iter()
            .filter_map(|c| {
                let words = lexical_terms_all(&c.text);
                let mut occurrences = 0usize;
                for term in &terms {
                    let n = words.iter().filter(|w| *w == term).count();
                    if n == 0 {
                        return None;
                    }
                    occurrences += n;
                }
                Some(to_hit(c, squash_relevance(occurrences as f64)))
            })
            .collect();
        sort_and_truncate(&mut hits, limit);
        Ok(hits)
    }

    async fn count_files(&self) -> Result<usize> {
        Ok(read(&self.files)?.len())
    }

    async fn count_chunks(&self) -> Result<usize> {
        Ok(read(&self.chunks)?.len())
    }

    async fn count_cached_embeddings(&self) -> Result<usize> {
        Ok(read(&self.cache)?.len())
    }

    async fn close(&self) {}
}

/// Every lowercase word of `text`, duplicates kept.
fn lexical_terms_all(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            hash: format!("hash-{}", path),
            mtime: 0,
            size: 0,
        }
    }

    fn chunk(path: &str, line: i64, text: &str, embedding: Option<Vec<f32>>) -> ChunkRecord {
        ChunkRecord {
            id: format!("{}:{}-{}", path, line, line),
            path: path.to_string(),
            source: "memory".to_string(),
            start_line: line,
            end_line: line,
            hash: crate::chunk::hash_text(text),
            model: "test".to_string(),
            text: text.to_string(),
            embedding,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_replace_file_swaps_chunks() {
        let store = InMemoryStore::new();
        let f = file("MEMORY.md");
        store
            .replace_file(&f, &[chunk("MEMORY.md", 1, "a", None), chunk("MEMORY.md", 2, "b", None)])
            .await
            .unwrap();
        store
            .replace_file(&f, &[chunk("MEMORY.md", 1, "c", None)])
            .await
            .unwrap();
        let chunks = store.chunks_for("MEMORY.md").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "c");
    }

    #[tokio::test]
    async fn test_delete_file_cascades() {
        let store = InMemoryStore::new();
        store
            .replace_file(&file("a.md"), &[chunk("a.md", 1, "x", None)])
            .await
            .unwrap();
        store.delete_file("a.md").await.unwrap();
        assert_eq!(store.count_files().await.unwrap(), 0);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_init_schema_rejects_dims_change() {
        let store = InMemoryStore::new();
        store.init_schema(4).await.unwrap();
        store.init_schema(4).await.unwrap();
        assert!(store.init_schema(8).await.is_err());
    }

    #[tokio::test]
    async fn test_evict_keeps_newest() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .store_cached_embeddings(
                    "p",
                    "m",
                    &[CacheEntry {
                        hash: format!("h{}", i),
                        embedding: vec![i as f32],
                    }],
                )
                .await
                .unwrap();
        }
        assert_eq!(store.evict_cached_embeddings(2).await.unwrap(), 3);
        let hashes: Vec<String> = (0..5).map(|i| format!("h{}", i)).collect();
        let left = store.load_cached_embeddings("p", "m", &hashes).await.unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.contains_key("h3") && left.contains_key("h4"));
    }

    #[tokio::test]
    async fn test_keyword_requires_all_terms() {
        let store = InMemoryStore::new();
        store
            .replace_file(
                &file("n.md"),
                &[
                    chunk("n.md", 1, "Buy milk and eggs", None),
                    chunk("n.md", 2, "Buy bread", None),
                ],
            )
            .await
            .unwrap();
        let hits = store.keyword_search("milk, buy!", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start_line, 1);
        assert!(hits[0].score > 0.0 && hits[0].score < 1.0);
    }

    #[tokio::test]
    async fn test_vector_search_skips_missing_embeddings() {
        let store = InMemoryStore::new();
        store
            .replace_file(
                &file("v.md"),
                &[
                    chunk("v.md", 1, "one", Some(vec![1.0, 0.0])),
                    chunk("v.md", 2, "two", None),
                    chunk("v.md", 3, "three", Some(vec![-1.0, 0.0])),
                ],
            )
            .await
            .unwrap();
        let hits = store.vector_search(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "v.md:1-1");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].score, 0.0);
    }
}
