/// SQLite-backed implementation of [`MemoryStore`].
use std::{collections::HashMap, path::Path, time::Duration};

use {
    async_trait::async_trait,
    sqlx::{
        QueryBuilder, Sqlite, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::{debug, warn},
};

use crate::{
    schema::{CacheRow, ChunkRow, decode_embedding, encode_embedding, run_migrations},
    store::MemoryStore,
};

/// Keys per `IN (...)` lookup, well under SQLite's bound-parameter limit.
const LOOKUP_BATCH: usize = 500;

type ChunkTuple = (String, String, String, Vec<u8>, String, i64);

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Wrap an existing pool. The caller is responsible for running migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `db_path` and run migrations.
    ///
    /// Every store holds a single connection: one writer per manager, with WAL
    /// letting other processes read alongside it. `:memory:` is a private database.
    pub async fn open(db_path: &str) -> anyhow::Result<Self> {
        let pool = if db_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = Path::new(db_path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?
        };
        run_migrations(&pool).await?;
        debug!(db_path, "opened memory store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn chunk_from_tuple(
    (id, source, content, embedding, content_hash, updated_at): ChunkTuple,
) -> ChunkRow {
    let embedding = decode_embedding(&embedding).unwrap_or_else(|| {
        warn!(chunk_id = %id, "chunk embedding unreadable, treating as empty");
        Vec::new()
    });
    ChunkRow {
        id,
        source,
        content,
        embedding,
        content_hash,
        updated_at,
    }
}

const SELECT_CHUNKS: &str =
    "SELECT id, source, content, embedding, content_hash, updated_at FROM chunks";

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn replace_source_chunks(
        &self,
        source: &str,
        chunks: &[ChunkRow],
    ) -> anyhow::Result<()> {
        // Dropping `tx` without commit rolls back, leaving the previous set intact.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, source, content, embedding, content_hash, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(source)
            .bind(&chunk.content)
            .bind(encode_embedding(&chunk.embedding)?)
            .bind(&chunk.content_hash)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, source: &str) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn list_sources(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT source FROM chunks ORDER BY source")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn get_chunks_for_source(&self, source: &str) -> anyhow::Result<Vec<ChunkRow>> {
        let rows: Vec<ChunkTuple> =
            sqlx::query_as(&format!("{SELECT_CHUNKS} WHERE source = ? ORDER BY id"))
                .bind(source)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(chunk_from_tuple).collect())
    }

    async fn get_chunk_by_id(&self, id: &str) -> anyhow::Result<Option<ChunkRow>> {
        let row: Option<ChunkTuple> = sqlx::query_as(&format!("{SELECT_CHUNKS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(chunk_from_tuple))
    }

    async fn all_chunks(&self) -> anyhow::Result<Vec<ChunkRow>> {
        let rows: Vec<ChunkTuple> = sqlx::query_as(&format!("{SELECT_CHUNKS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(chunk_from_tuple).collect())
    }

    async fn count_chunks(&self) -> anyhow::Result<usize> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn get_cached_embeddings(
        &self,
        keys: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for batch in keys.chunks(LOOKUP_BATCH) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT content_hash, embedding FROM embedding_cache WHERE content_hash IN (",
            );
            let mut sep = qb.separated(", ");
            for key in batch {
                sep.push_bind(key.as_str());
            }
            sep.push_unseparated(")");

            let rows: Vec<(String, Vec<u8>)> = qb.build_query_as().fetch_all(&self.pool).await?;
            for (key, blob) in rows {
                match decode_embedding(&blob) {
                    Some(embedding) => {
                        found.insert(key, embedding);
                    },
                    None => warn!(key = %key, "ignoring corrupt embedding cache row"),
                }
            }
        }
        Ok(found)
    }

    async fn put_cached_embeddings(&self, rows: &[CacheRow]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO embedding_cache (content_hash, embedding, provider, model, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    embedding = excluded.embedding,
                    provider = excluded.provider,
                    model = excluded.model,
                    updated_at = excluded.updated_at",
            )
            .bind(&row.content_hash)
            .bind(encode_embedding(&row.embedding)?)
            .bind(&row.provider)
            .bind(&row.model)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_cached_embeddings(&self) -> anyhow::Result<usize> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn evict_embedding_cache(&self, keep: usize) -> anyhow::Result<usize> {
        let res = sqlx::query(
            "DELETE FROM embedding_cache WHERE content_hash IN (
                SELECT content_hash FROM embedding_cache
                ORDER BY updated_at DESC, content_hash
                LIMIT -1 OFFSET ?
            )",
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        let removed = res.rows_affected() as usize;
        if removed > 0 {
            debug!(removed, keep, "evicted embedding cache rows");
        }
        Ok(removed)
    }
}
