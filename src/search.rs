//! `mem search`: hybrid search from the command line.
//!
//! Results print as a header line with the citation and fused score,
//! followed by the snippet:
//!
//! ```text
//! --- MEMORY.md#L1-L1 (score: 0.8500) ---
//! Buy milk
//! ```
//!
//! `--json` prints the result array instead, for scripts.

use anyhow::Result;

use memory_harness_core::models::SearchResult;

use crate::config::Config;
use crate::manager::{MemoryManager, SearchOptions};
use crate::registry::EmbeddingRegistry;

pub async fn run_search(
    config: &Config,
    registry: &EmbeddingRegistry,
    query: &str,
    limit: Option<usize>,
    min_score: Option<f64>,
    json: bool,
) -> Result<()> {
    let mut cfg = config.clone();
    cfg.sync.watch = false;

    let manager = MemoryManager::open(cfg, registry).await?;
    let results = manager
        .search(
            query,
            SearchOptions {
                max_results: limit,
                min_score,
            },
        )
        .await;
    manager.close().await;
    let results = results?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No results.");
    } else {
        print!("{}", format_results(&results));
    }
    Ok(())
}

pub fn format_results(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("--- {} (score: {:.4}) ---\n", r.citation, r.score));
        out.push_str(&r.snippet);
        out.push('\n');
    }
    out
}
