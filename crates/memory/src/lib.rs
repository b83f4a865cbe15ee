//! Semantic memory retrieval: markdown files → chunks → embeddings → hybrid search in SQLite,
//! reranked by recency and diversity.

pub mod chunker;
pub mod config;
pub mod decay;
pub mod embeddings;
pub mod embeddings_cache;
pub mod embeddings_hash;
pub mod embeddings_openai;
pub mod error;
pub mod hashing;
pub mod manager;
pub mod mmr;
pub mod query;
pub mod schema;
pub mod search;
pub mod store;
pub mod store_sqlite;
#[cfg(feature = "file-watcher")]
pub mod watcher;

pub use {
    config::MemoryConfig,
    error::Error,
    manager::{MemoryManager, MemoryStatus, SyncReport},
    schema::run_migrations,
    search::SearchResult,
};
