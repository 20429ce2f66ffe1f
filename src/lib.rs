//! # Memory Harness
//!
//! A searchable memory index over a workspace of markdown notes.
//!
//! Memory Harness keeps `MEMORY.md` and `memory/*.md` indexed in SQLite
//! (chunk text, embeddings, and an FTS5 table) and answers free-text queries
//! with hybrid search: cosine similarity over embeddings fused with BM25
//! keyword relevance. A file watcher marks the index dirty so the next
//! search picks up edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Workspace  │──▶│   Indexer    │──▶│  SQLite   │
//! │ MEMORY.md   │   │ Chunk+Embed  │   │ FTS5+BLOB │
//! │ memory/*.md │   └──────▲───────┘   └─────┬─────┘
//! └──────┬──────┘          │                 │
//!        │ watcher   ┌─────┴──────┐          │
//!        └──────────▶│  Manager   │◀─────────┘
//!          (dirty)   │ sync/search│  hybrid search
//!                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mem init                 # create database
//! mem sync                 # index changed memory files
//! mem search "groceries"   # hybrid search
//! mem watch                # keep the index current
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and reset |
//! | [`cache`] | Embedding cache |
//! | [`sqlite_store`] | SQLite `MemoryStore` backend |
//! | [`embedding`] | HTTP embedding providers |
//! | [`registry`] | Provider registry |
//! | [`indexer`] | File discovery and sync pipeline |
//! | [`watcher`] | Filesystem watcher |
//! | [`manager`] | `MemoryManager` facade |
//! | [`progress`] | Sync progress reporters |
//!
//! Chunking, vector utilities, the storage trait, and hybrid fusion live in
//! the `memory-harness-core` crate.

pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod manager;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod sync_cmd;
pub mod watcher;
