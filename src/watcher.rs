//! Filesystem watcher that marks the memory index dirty.
//!
//! Uses `notify-debouncer-full` to wait until writes settle, then forwards
//! relevant events over an unbounded tokio channel. A tokio task drains the
//! channel and runs a resettable timer: every event restarts it, and when it
//! finally expires the `on_dirty` callback runs once. The callback is told
//! nothing about which file changed; the indexer's hash check sorts that out.
//!
//! Watched paths:
//! - the workspace root, non-recursively, filtered to `MEMORY.md` / `memory.md`
//! - `memory/`, non-recursively, if it exists (added later if it appears)

use anyhow::{Context, Result};
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::indexer::{MEMORY_DIR, ROOT_MEMORY_FILES};

type FsDebouncer = Debouncer<RecommendedWatcher, RecommendedCache>;

/// Invoked once per settled burst of changes.
pub type DirtyCallback = Arc<dyn Fn() + Send + Sync>;

pub struct MemoryWatcher {
    debouncer: Option<Arc<Mutex<FsDebouncer>>>,
    task: Option<JoinHandle<()>>,
}

impl MemoryWatcher {
    /// Start watching `workspace`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when the OS watcher cannot be created or the workspace cannot
    /// be watched.
    pub fn start(workspace: &Path, debounce: Duration, on_dirty: DirtyCallback) -> Result<Self> {
        let root = std::fs::canonicalize(workspace).unwrap_or_else(|_| workspace.to_path_buf());
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let filter_root = root.clone();
        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            if !is_memory_path(&filter_root, path) {
                                continue;
                            }
                            debug!(path = %path.display(), "memory file changed");
                            if tx.send(path.clone()).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher error");
                    }
                }
            }
        })
        .context("Failed to create file watcher")?;

        let debouncer = Arc::new(Mutex::new(debouncer));
        {
            let mut guard = debouncer
                .lock()
                .map_err(|_| anyhow::anyhow!("file watcher lock poisoned"))?;
            guard
                .watch(&root, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
        }
        let mut memory_dir_watched = watch_memory_dir(&debouncer, &root);
        info!(workspace = %root.display(), "memory watcher started");

        let task_debouncer = debouncer.clone();
        let task = tokio::spawn(debounce_loop(rx, debounce, move || {
            if !memory_dir_watched {
                memory_dir_watched = watch_memory_dir(&task_debouncer, &root);
            }
            on_dirty();
        }));

        Ok(Self {
            debouncer: Some(debouncer),
            task: Some(task),
        })
    }

    /// Stop watching. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.debouncer.take().is_some() {
            debug!("memory watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for MemoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watch `memory/` if it exists. Returns whether it is now watched.
fn watch_memory_dir(debouncer: &Mutex<FsDebouncer>, root: &Path) -> bool {
    let dir = root.join(MEMORY_DIR);
    if !dir.is_dir() {
        return false;
    }
    let Ok(mut guard) = debouncer.lock() else {
        return false;
    };
    match guard.watch(&dir, RecursiveMode::NonRecursive) {
        Ok(()) => {
            debug!(dir = %dir.display(), "watching memory directory");
            true
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to watch memory directory");
            false
        }
    }
}

/// Whether `path` is a root memory file or anything under `memory/`.
pub fn is_memory_path(root: &Path, path: &Path) -> bool {
    if path.starts_with(root.join(MEMORY_DIR)) {
        return true;
    }
    path.parent() == Some(root)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| ROOT_MEMORY_FILES.contains(&n))
            .unwrap_or(false)
}

/// Drain `rx`, calling `on_fire` once `window` passes without a new event.
///
/// Returns when the channel closes; a burst still pending at that point
/// fires first.
pub async fn debounce_loop<T, F>(mut rx: mpsc::UnboundedReceiver<T>, window: Duration, mut on_fire: F)
where
    F: FnMut(),
{
    while rx.recv().await.is_some() {
        loop {
            tokio::select! {
                next = rx.recv() => {
                    if next.is_none() {
                        on_fire();
                        return;
                    }
                }
                _ = tokio::time::sleep(window) => {
                    on_fire();
                    break;
                }
            }
        }
    }
}
