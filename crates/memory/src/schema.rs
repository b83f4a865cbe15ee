/// Row types and table definitions for the SQLite memory store.
use {
    sqlx::SqlitePool,
    tracing::{debug, warn},
};

/// A stored chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRow {
    pub id: String,
    /// Path of the source file.
    pub source: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// A cached embedding keyed by `sha256(provider:model:text)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub provider: String,
    pub model: String,
    pub updated_at: i64,
}

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chunks (
        id           TEXT PRIMARY KEY,
        source       TEXT NOT NULL,
        content      TEXT NOT NULL,
        embedding    BLOB NOT NULL,
        content_hash TEXT NOT NULL,
        updated_at   INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash)",
    "CREATE TABLE IF NOT EXISTS embedding_cache (
        content_hash TEXT PRIMARY KEY,
        embedding    BLOB NOT NULL,
        provider     TEXT NOT NULL,
        model        TEXT NOT NULL,
        updated_at   INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at ON embedding_cache(updated_at)",
];

/// Create tables and indexes if they do not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    debug!("memory schema ready");
    Ok(())
}

/// Serialize a vector as a UTF-8 JSON array.
pub fn encode_embedding(embedding: &[f32]) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(embedding)?)
}

/// Parse a JSON-encoded vector; `None` when the blob is corrupt.
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    match serde_json::from_slice::<Vec<f32>>(blob) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, bytes = blob.len(), "corrupt embedding blob");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn embedding_round_trips_exactly() {
        let v = vec![0.1_f32, -0.333_333_34, 1.0e-7, f32::MIN_POSITIVE, 0.0];
        let blob = encode_embedding(&v).unwrap();
        assert!(std::str::from_utf8(&blob).unwrap().starts_with('['));
        assert_eq!(decode_embedding(&blob).unwrap(), v);
    }

    #[test]
    fn corrupt_blob_decodes_to_none() {
        assert!(decode_embedding(b"[0.1, 0.2").is_none());
        assert!(decode_embedding(b"\"nope\"").is_none());
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["chunks", "embedding_cache"]);
    }
}
