//! # Memory Harness CLI (`mem`)
//!
//! ## Usage
//!
//! ```bash
//! mem --config ./config/mem.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mem init` | Create the SQLite database and schema |
//! | `mem index` | Re-index every memory file |
//! | `mem sync` | Index changed memory files, drop deleted ones |
//! | `mem search "<query>"` | Hybrid search over memory |
//! | `mem status` | Show what is indexed |
//! | `mem reset` | Drop the memory index |
//! | `mem watch` | Keep the index current until Ctrl-C |
//!
//! Logs go to stderr. `RUST_LOG` overrides the level chosen by `-v`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memory_harness::config;
use memory_harness::migrate;
use memory_harness::progress::ProgressMode;
use memory_harness::registry::EmbeddingRegistry;
use memory_harness::{search, stats, sync_cmd};

/// Memory Harness CLI: index markdown notes and search them.
#[derive(Parser)]
#[command(
    name = "mem",
    about = "Memory Harness: hybrid search over a workspace of markdown notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mem.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Fails if the database was created for a different
    /// embedding width; use `mem reset` first when switching providers.
    Init,

    /// Re-index every memory file, ignoring stored hashes.
    Index {
        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json_progress: bool,
    },

    /// Index changed memory files and remove deleted ones.
    Sync {
        /// Re-index files even if unchanged.
        #[arg(long)]
        force: bool,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json_progress: bool,
    },

    /// Search memory.
    Search {
        /// Query text.
        #[arg(required = true)]
        query: Vec<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum fused score (0.0 to 1.0).
        #[arg(long)]
        min_score: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index status.
    Status {
        /// Print status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Drop all memory tables.
    Reset,

    /// Watch the workspace and re-sync on change until Ctrl-C.
    Watch,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn progress_mode(json: bool) -> ProgressMode {
    if json {
        ProgressMode::Json
    } else {
        ProgressMode::default_for_tty()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let registry = EmbeddingRegistry::with_builtins();

    match cli.command {
        Commands::Init => {
            let provider = registry.resolve(&cfg.embedding.provider, &cfg.embedding)?;
            migrate::run_migrations(&cfg, provider.dims()).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { json_progress } => {
            sync_cmd::run_sync(&cfg, &registry, true, progress_mode(json_progress)).await?;
        }
        Commands::Sync {
            force,
            json_progress,
        } => {
            sync_cmd::run_sync(&cfg, &registry, force, progress_mode(json_progress)).await?;
        }
        Commands::Search {
            query,
            limit,
            min_score,
            json,
        } => {
            let query = query.join(" ");
            search::run_search(&cfg, &registry, &query, limit, min_score, json).await?;
        }
        Commands::Status { json } => {
            stats::run_status(&cfg, &registry, json).await?;
        }
        Commands::Reset => {
            sync_cmd::run_reset(&cfg).await?;
        }
        Commands::Watch => {
            sync_cmd::run_watch(&cfg, &registry).await?;
        }
    }

    Ok(())
}
