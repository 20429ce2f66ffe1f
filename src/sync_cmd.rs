//! `mem index`, `mem sync`, `mem watch`, and `mem reset`.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

use memory_harness_core::models::SyncSummary;

use crate::config::Config;
use crate::db;
use crate::manager::{MemoryManager, SyncParams};
use crate::migrate;
use crate::progress::ProgressMode;
use crate::registry::EmbeddingRegistry;

/// Sync the workspace once and print a summary. `force` re-indexes every
/// file regardless of its stored hash (`mem index`).
pub async fn run_sync(
    config: &Config,
    registry: &EmbeddingRegistry,
    force: bool,
    mode: ProgressMode,
) -> Result<()> {
    let mut cfg = config.clone();
    cfg.sync.watch = false;

    let manager = MemoryManager::open(cfg, registry).await?;
    let reporter = mode.reporter();
    let result = manager
        .sync(SyncParams {
            force,
            progress: Some(&*reporter),
        })
        .await;
    manager.close().await;

    match result? {
        Some(summary) => print!("{}", format_summary(&summary)),
        None => println!("sync already in progress"),
    }
    Ok(())
}

/// Keep the index current until Ctrl-C.
///
/// Runs one sync up front, then re-syncs whenever the watcher marks the
/// index dirty. A failed sync is logged and retried on the next change.
pub async fn run_watch(config: &Config, registry: &EmbeddingRegistry) -> Result<()> {
    let mut cfg = config.clone();
    cfg.sync.watch = true;
    let poll = Duration::from_millis(cfg.sync.watch_debounce_ms.max(100));

    let manager = MemoryManager::open(cfg, registry).await?;
    manager.init().await?;
    println!(
        "watching {} (Ctrl-C to stop)",
        manager.config().workspace.dir.display()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if manager.is_dirty() {
            match manager.sync(SyncParams::default()).await {
                Ok(Some(summary)) if summary.indexed > 0 || summary.removed > 0 => {
                    print!("{}", format_summary(&summary));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %format!("{:#}", e), "sync failed"),
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = tokio::time::sleep(poll) => {}
        }
    }

    info!("stopping watcher");
    manager.close().await;
    Ok(())
}

/// Drop every memory table so the next run rebuilds from scratch.
pub async fn run_reset(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = migrate::drop_schema(&pool).await;
    pool.close().await;
    result?;
    println!("Memory index reset. Run `mem sync` to rebuild it.");
    Ok(())
}

pub fn format_summary(summary: &SyncSummary) -> String {
    format!(
        "sync memory\n  indexed files: {}\n  removed files: {}\n  chunks written: {}\nok\n",
        summary.indexed, summary.removed, summary.chunks
    )
}
