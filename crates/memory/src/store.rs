/// Storage abstraction for chunks and the embedding cache.
use async_trait::async_trait;

use crate::schema::{CacheRow, ChunkRow};

#[async_trait]
pub trait MemoryStore: Send + Sync {
    // ---- chunks ----

    /// Atomically replace every chunk of `source` with `chunks`.
    ///
    /// Readers observe either the previous set or the new one, never a mix.
    async fn replace_source_chunks(&self, source: &str, chunks: &[ChunkRow])
    -> anyhow::Result<()>;

    /// Delete every chunk of `source`. Returns the number of rows removed.
    async fn delete_source(&self, source: &str) -> anyhow::Result<u64>;

    /// Distinct source paths present in the store.
    async fn list_sources(&self) -> anyhow::Result<Vec<String>>;

    async fn get_chunks_for_source(&self, source: &str) -> anyhow::Result<Vec<ChunkRow>>;

    async fn get_chunk_by_id(&self, id: &str) -> anyhow::Result<Option<ChunkRow>>;

    /// Every chunk, ordered by id. Rows whose embedding cannot be decoded carry an
    /// empty vector.
    async fn all_chunks(&self) -> anyhow::Result<Vec<ChunkRow>>;

    async fn count_chunks(&self) -> anyhow::Result<usize>;

    // ---- embedding cache ----

    /// Look up cached embeddings by key. Missing or corrupt rows are absent from the result.
    async fn get_cached_embeddings(
        &self,
        keys: &[String],
    ) -> anyhow::Result<std::collections::HashMap<String, Vec<f32>>>;

    async fn put_cached_embeddings(&self, rows: &[CacheRow]) -> anyhow::Result<()>;

    /// Count the number of rows in the embedding cache.
    async fn count_cached_embeddings(&self) -> anyhow::Result<usize>;

    /// Evict the oldest cache rows, keeping at most `keep` entries.
    async fn evict_embedding_cache(&self, keep: usize) -> anyhow::Result<usize>;
}
