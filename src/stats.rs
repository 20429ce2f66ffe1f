//! `mem status`: what is indexed and whether it is current.

use anyhow::Result;

use crate::config::Config;
use crate::manager::{MemoryManager, StatusSnapshot};
use crate::progress::format_number;
use crate::registry::EmbeddingRegistry;

pub async fn run_status(config: &Config, registry: &EmbeddingRegistry, json: bool) -> Result<()> {
    let mut cfg = config.clone();
    cfg.sync.watch = false;

    let manager = MemoryManager::open(cfg, registry).await?;
    let status = manager.status().await;
    manager.close().await;
    let status = status?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status, &config.db.path.display().to_string()));
    }
    Ok(())
}

pub fn format_status(status: &StatusSnapshot, db_path: &str) -> String {
    let on_off = |b: bool| if b { "on" } else { "off" };
    let mut out = String::new();
    out.push_str("Memory Harness Status\n");
    out.push_str("=====================\n\n");
    out.push_str(&format!("  Workspace:   {}\n", status.workspace_dir));
    out.push_str(&format!("  Database:    {}\n", db_path));
    out.push_str(&format!("  Provider:    {} ({})\n", status.provider, status.model));
    out.push_str(&format!("  Dimensions:  {}\n\n", status.vector.dims));
    out.push_str(&format!("  Files:       {}\n", format_number(status.files as u64)));
    out.push_str(&format!("  Chunks:      {}\n", format_number(status.chunks as u64)));
    out.push_str(&format!(
        "  Cache:       {} ({} entries)\n",
        on_off(status.cache.enabled),
        format_number(status.cache.entries as u64)
    ));
    out.push_str(&format!("  Full-text:   {}\n", on_off(status.fts.enabled)));
    out.push_str(&format!(
        "  Index:       {}\n",
        if status.dirty { "stale (sync pending)" } else { "up to date" }
    ));
    out
}
