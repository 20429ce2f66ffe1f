//! The memory facade: lazy init, dirty-triggered resync, single-flight sync.
//!
//! [`MemoryManager`] composes the store, the embedding provider, the
//! indexer, hybrid search, and the watcher behind four calls:
//!
//! | Call | Behavior |
//! |------|----------|
//! | [`search`](MemoryManager::search) | init; best-effort sync when dirty; embed query; hybrid search |
//! | [`sync`](MemoryManager::sync) | init; run the indexer unless a sync is already in flight |
//! | [`status`](MemoryManager::status) | init; point-in-time counts and flags |
//! | [`close`](MemoryManager::close) | stop the watcher and release the store |
//!
//! Concurrent callers are safe. Two overlapping `sync` calls never both
//! write: the second returns `Ok(None)` immediately. `search` only waits on
//! a sync it started itself because the index was dirty.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use memory_harness_core::embedding::EmbeddingProvider;
use memory_harness_core::models::{SearchResult, SyncSummary};
use memory_harness_core::search::hybrid_search;
use memory_harness_core::store::MemoryStore;

use crate::config::Config;
use crate::db;
use crate::indexer::{check_dims, sync_memory_files, IndexOptions};
use crate::progress::SyncProgressReporter;
use crate::registry::EmbeddingRegistry;
use crate::sqlite_store::SqliteStore;
use crate::watcher::MemoryWatcher;

/// Per-call overrides of the `[search]` config section.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
}

#[derive(Default)]
pub struct SyncParams<'a> {
    pub force: bool,
    pub progress: Option<&'a dyn SyncProgressReporter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub provider: String,
    pub model: String,
    pub files: usize,
    pub chunks: usize,
    pub dirty: bool,
    pub workspace_dir: String,
    pub cache: CacheStatus,
    pub fts: FtsStatus,
    pub vector: VectorStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub enabled: bool,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FtsStatus {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStatus {
    pub enabled: bool,
    pub dims: usize,
}

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    watcher: Option<MemoryWatcher>,
}

pub struct MemoryManager {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn MemoryStore>,
    dirty: Arc<AtomicBool>,
    syncing: AtomicBool,
    state: Mutex<ManagerState>,
}

/// Clears the single-flight latch however the sync ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MemoryManager {
    /// Compose a manager from explicit parts. Nothing is touched until the
    /// first call that needs initialization.
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            dirty: Arc::new(AtomicBool::new(true)),
            syncing: AtomicBool::new(false),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Resolve `embedding.provider` from `registry` and open the SQLite store.
    ///
    /// # Errors
    ///
    /// Fails for an unknown provider id, missing provider credentials, or a
    /// database that cannot be opened.
    pub async fn open(config: Config, registry: &EmbeddingRegistry) -> Result<Self> {
        let provider = registry.resolve(&config.embedding.provider, &config.embedding)?;
        let pool = db::connect(&config).await?;
        let store: Arc<dyn MemoryStore> = Arc::new(SqliteStore::new(pool));
        Ok(Self::new(config, provider, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Mark the index stale so the next search resyncs first.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Create the schema and start the watcher. Idempotent.
    ///
    /// A watcher that fails to start is logged and skipped; searches still
    /// resync whenever [`mark_dirty`](Self::mark_dirty) is called.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        self.store.init_schema(self.provider.dims()).await?;

        if self.config.sync.watch && state.watcher.is_none() {
            let dirty = self.dirty.clone();
            match MemoryWatcher::start(
                &self.config.workspace.dir,
                Duration::from_millis(self.config.sync.watch_debounce_ms),
                Arc::new(move || dirty.store(true, Ordering::SeqCst)),
            ) {
                Ok(watcher) => state.watcher = Some(watcher),
                Err(e) => warn!(error = %format!("{:#}", e), "memory watcher unavailable"),
            }
        }

        state.initialized = true;
        Ok(())
    }

    /// Search the memory index.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be embedded, its width differs from the
    /// index's, or vector ranking fails. A
    /// failed opportunistic resync is logged and never fails the search.
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<SearchResult>> {
        self.init().await?;

        if self.is_dirty() {
            if let Err(e) = self.sync(SyncParams::default()).await {
                warn!(error = %format!("{:#}", e), "memory sync before search failed");
            }
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let max_results = opts
            .max_results
            .unwrap_or(self.config.search.max_results)
            .max(1);
        let min_score = opts.min_score.unwrap_or(self.config.search.min_score);

        let query_vec = self.provider.embed_query(query).await?;
        check_dims(self.provider.as_ref(), std::slice::from_ref(&query_vec))?;
        hybrid_search(
            self.store.as_ref(),
            query,
            &query_vec,
            &self.config.hybrid_params(),
            max_results,
            min_score,
        )
        .await
    }

    /// Sync the index with the workspace.
    ///
    /// Returns `Ok(None)` without doing anything when another sync is
    /// already running.
    ///
    /// # Errors
    ///
    /// The first per-file failure aborts the run; files committed before
    /// it stay indexed and the index stays dirty.
    pub async fn sync(&self, params: SyncParams<'_>) -> Result<Option<SyncSummary>> {
        self.init().await?;

        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return Ok(None);
        }
        let _guard = SyncingGuard(&self.syncing);

        // Changes that land while this run is in flight re-set the flag.
        self.dirty.store(false, Ordering::SeqCst);

        let opts = IndexOptions {
            force: params.force,
            chunking: self.config.chunking_params(),
            cache: self.config.cache.clone(),
            progress: params.progress,
        };

        match sync_memory_files(
            self.store.as_ref(),
            self.provider.as_ref(),
            &self.config.workspace.dir,
            &opts,
        )
        .await
        {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                self.mark_dirty();
                Err(e)
            }
        }
    }

    /// Point-in-time snapshot; not consistent with a concurrent sync.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.init().await?;

        let cache_entries = if self.config.cache.enabled {
            self.store.count_cached_embeddings().await?
        } else {
            0
        };

        Ok(StatusSnapshot {
            provider: self.provider.id().to_string(),
            model: self.provider.model_name().to_string(),
            files: self.store.count_files().await?,
            chunks: self.store.count_chunks().await?,
            dirty: self.is_dirty(),
            workspace_dir: self.config.workspace.dir.display().to_string(),
            cache: CacheStatus {
                enabled: self.config.cache.enabled,
                entries: cache_entries,
            },
            fts: FtsStatus { enabled: true },
            vector: VectorStatus {
                enabled: true,
                dims: self.provider.dims(),
            },
        })
    }

    /// Stop the watcher and release the store. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut watcher) = state.watcher.take() {
            watcher.stop();
        }
        if state.initialized {
            self.store.close().await;
        }
        state.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use async_trait::async_trait;
    use memory_harness_core::models::SyncProgress;
    use memory_harness_core::store::memory::InMemoryStore;
    use tempfile::TempDir;

    /// One dimension per vocabulary word; unknown words are ignored.
    struct VocabProvider;

    const VOCAB: [&str; 4] = ["milk", "eggs", "plumber", "sink"];

    fn embed(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let v: Vec<f32> = VOCAB
            .iter()
            .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
            .collect();
        memory_harness_core::embedding::normalize(v)
    }

    #[async_trait]
    impl EmbeddingProvider for VocabProvider {
        fn id(&self) -> &str {
            "vocab"
        }
        fn model_name(&self) -> &str {
            "vocab-4"
        }
        fn dims(&self) -> usize {
            VOCAB.len()
        }
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(embed(text))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| embed(t)).collect())
        }
    }

    /// [`VocabProvider`] with a batch delay and switchable failures.
    struct ScriptedProvider {
        delay: Duration,
        fail_batches: AtomicBool,
        wide_queries: AtomicBool,
    }

    impl ScriptedProvider {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                fail_batches: AtomicBool::new(false),
                wide_queries: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }
        fn model_name(&self) -> &str {
            "vocab-4"
        }
        fn dims(&self) -> usize {
            VOCAB.len()
        }
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = embed(text);
            if self.wide_queries.load(Ordering::SeqCst) {
                v.push(0.0);
            }
            Ok(v)
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(self.delay).await;
            if self.fail_batches.load(Ordering::SeqCst) {
                anyhow::bail!("provider unavailable");
            }
            Ok(texts.iter().map(|t| embed(t)).collect())
        }
    }

    fn manager(tmp: &TempDir) -> MemoryManager {
        manager_with(tmp, Arc::new(VocabProvider))
    }

    fn manager_with(tmp: &TempDir, provider: Arc<dyn EmbeddingProvider>) -> MemoryManager {
        let toml = format!(
            r#"
[db]
path = "{}/mem.sqlite"

[workspace]
dir = "{}"

[sync]
watch = false
"#,
            tmp.path().display(),
            tmp.path().display()
        );
        let config = parse_config(&toml).unwrap();
        MemoryManager::new(config, provider, Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_search_syncs_when_dirty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let mgr = manager(&tmp);
        assert!(mgr.is_dirty());

        let results = mgr.search("milk", SearchOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0);
        assert!(results[0].citation.ends_with("#L1-L1"));
        assert!(!mgr.is_dirty());
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let mgr = manager(&tmp);
        assert!(mgr.search("   ", SearchOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_options_override_config() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("memory")).unwrap();
        std::fs::write(tmp.path().join("memory/a.md"), "milk and eggs").unwrap();
        std::fs::write(tmp.path().join("memory/b.md"), "milk for the plumber").unwrap();
        let mgr = manager(&tmp);

        let all = mgr
            .search("milk", SearchOptions { max_results: Some(10), min_score: Some(0.0) })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let one = mgr
            .search("milk", SearchOptions { max_results: Some(1), min_score: Some(0.0) })
            .await
            .unwrap();
        assert_eq!(one.len(), 1);

        let none = mgr
            .search("milk", SearchOptions { max_results: None, min_score: Some(1.0) })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_second_sync_while_running_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let provider = Arc::new(ScriptedProvider::slow(Duration::from_millis(200)));
        let mgr = manager_with(&tmp, provider);

        let (a, b) = tokio::join!(
            mgr.sync(SyncParams::default()),
            mgr.sync(SyncParams::default())
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_none()).count(), 1);
        let ran = outcomes.iter().flatten().next().unwrap();
        assert_eq!(ran.indexed, 1);
        assert!(!mgr.syncing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_search_survives_failed_resync() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let provider = Arc::new(ScriptedProvider::slow(Duration::ZERO));
        let mgr = manager_with(&tmp, provider.clone());
        mgr.sync(SyncParams::default()).await.unwrap();

        std::fs::create_dir_all(tmp.path().join("memory")).unwrap();
        std::fs::write(tmp.path().join("memory/new.md"), "Call the plumber").unwrap();
        provider.fail_batches.store(true, Ordering::SeqCst);
        mgr.mark_dirty();

        let results = mgr
            .search("milk", SearchOptions { max_results: Some(5), min_score: Some(0.0) })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "MEMORY.md");
        assert!(mgr.is_dirty());
    }

    #[tokio::test]
    async fn test_query_width_mismatch_fails_search() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let provider = Arc::new(ScriptedProvider::slow(Duration::ZERO));
        let mgr = manager_with(&tmp, provider.clone());
        mgr.sync(SyncParams::default()).await.unwrap();

        provider.wide_queries.store(true, Ordering::SeqCst);
        let err = mgr
            .search("milk", SearchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("5-dimensional embedding, expected 4"));
    }

    #[tokio::test]
    async fn test_sync_reports_progress_and_second_run_is_noop() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk").unwrap();
        let mgr = manager(&tmp);

        let labels = std::sync::Mutex::new(Vec::new());
        let reporter = |p: &SyncProgress| labels.lock().unwrap().push(p.label.clone());
        let first = mgr
            .sync(SyncParams {
                force: false,
                progress: Some(&reporter as &dyn SyncProgressReporter),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.indexed, 1);

        let second = mgr.sync(SyncParams::default()).await.unwrap().unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(
            labels.into_inner().unwrap(),
            vec!["indexed MEMORY.md (1 chunks)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "Buy milk\n\nCall the plumber").unwrap();
        let mgr = manager(&tmp);
        mgr.sync(SyncParams::default()).await.unwrap();

        let status = mgr.status().await.unwrap();
        assert_eq!(status.provider, "vocab");
        assert_eq!(status.model, "vocab-4");
        assert_eq!(status.files, 1);
        assert!(status.chunks >= 1);
        assert!(!status.dirty);
        assert!(status.cache.enabled);
        assert!(status.cache.entries >= 1);
        assert_eq!(status.vector.dims, 4);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("workspaceDir").is_some());
        assert_eq!(json["vector"]["dims"], 4);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        mgr.init().await.unwrap();
        mgr.close().await;
        mgr.close().await;
        assert!(!mgr.state.lock().await.initialized);
    }
}
