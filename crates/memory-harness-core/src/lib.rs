//! # Memory Harness Core
//!
//! Shared logic for Memory Harness: data models, chunking, the store
//! abstraction, hybrid search fusion, and the embedding provider trait.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Those live in the `memory-harness` application crate, which supplies
//! a SQLite-backed [`store::MemoryStore`] and concrete embedding providers.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
