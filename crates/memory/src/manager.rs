/// Memory manager: orchestrates file indexing, change detection, sync, and search.
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    serde::Serialize,
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

use crate::{
    chunker::chunk_text,
    config::MemoryConfig,
    decay::apply_decay,
    embeddings::{EmbeddingProvider, create_provider},
    error::Error,
    hashing::sha256_hex,
    mmr::mmr_rerank,
    schema::ChunkRow,
    search::{self, SearchResult},
    store::MemoryStore,
    store_sqlite::SqliteMemoryStore,
};

type SyncFuture = Shared<BoxFuture<'static, Result<SyncReport, Arc<anyhow::Error>>>>;

/// Cheaply cloneable handle; clones share the store, caches and sync state.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: MemoryConfig,
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// Last indexed content hash per source path. Process-local.
    file_hashes: Mutex<HashMap<String, String>>,
    /// Serializes read, embed and replace per source path.
    source_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    dirty: AtomicBool,
    in_flight: Mutex<Option<SyncFuture>>,
}

/// Status info about the memory system.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub total_sources: usize,
    pub total_chunks: usize,
    pub cached_embeddings: usize,
    pub embedding_model: String,
    pub dirty: bool,
}

/// Outcome of one sync or directory pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub files_updated: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    /// Files that vanished or could not be read during the walk.
    pub skipped: usize,
}

impl SyncReport {
    fn merge(&mut self, other: &SyncReport) {
        self.files_updated += other.files_updated;
        self.files_unchanged += other.files_unchanged;
        self.files_removed += other.files_removed;
        self.skipped += other.skipped;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the in-flight slot when the spawned pass ends, even by panic.
struct ClearInFlight(MemoryManager);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        *lock(&self.0.inner.in_flight) = None;
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis())
}

pub(crate) fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md" | "markdown")
    )
}

impl MemoryManager {
    pub fn new(
        config: MemoryConfig,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                embedder,
                file_hashes: Mutex::new(HashMap::new()),
                source_locks: Mutex::new(HashMap::new()),
                dirty: AtomicBool::new(true),
                in_flight: Mutex::new(None),
            }),
        })
    }

    /// Open the SQLite store at `config.db_path` and build the configured embedder.
    pub async fn open(config: MemoryConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::open(&config.db_path).await?);
        let embedder = create_provider(&config, Arc::clone(&store))?;
        info!(
            db = %config.db_path,
            provider = config.embedding_provider.as_str(),
            model = embedder.model_name(),
            "memory manager ready"
        );
        Self::new(config, store, embedder)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    fn source_lock(&self, source: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.inner.source_locks)
                .entry(source.to_string())
                .or_default(),
        )
    }

    /// Index one file. Returns `false` without touching the store when its content
    /// hash matches the last indexed version.
    ///
    /// Calls for the same path run one at a time, so the last call to start
    /// commits the content it read.
    pub async fn index_file(&self, path: &Path) -> anyhow::Result<bool> {
        let source = path.to_string_lossy().into_owned();
        let source_lock = self.source_lock(&source);
        let _guard = source_lock.lock().await;

        let content = tokio::fs::read_to_string(path).await?;
        let hash = sha256_hex(&content);

        if lock(&self.inner.file_hashes).get(&source) == Some(&hash) {
            debug!(path = %source, "unchanged, skipping");
            return Ok(false);
        }

        let config = &self.inner.config;
        let updated_at = file_mtime_ms(path).await.unwrap_or_else(now_ms);
        let chunks = chunk_text(&content, &source, config.chunk_size, config.chunk_overlap);

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.inner.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingResponse(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            ))
            .into());
        }

        let rows: Vec<ChunkRow> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRow {
                id: chunk.id,
                source: source.clone(),
                content: chunk.content,
                embedding,
                content_hash: chunk.content_hash,
                updated_at,
            })
            .collect();

        self.inner.store.replace_source_chunks(&source, &rows).await?;
        lock(&self.inner.file_hashes).insert(source.clone(), hash);
        info!(path = %source, chunks = rows.len(), "indexed file");
        Ok(true)
    }

    /// Index every markdown file under `dir`, then drop stored sources under `dir`
    /// that no longer exist.
    pub async fn index_directory(&self, dir: &Path) -> anyhow::Result<SyncReport> {
        self.inner.dirty.store(false, Ordering::SeqCst);
        let result = self.walk_directory(dir).await;
        if result.is_err() {
            self.mark_dirty();
        }
        result
    }

    async fn walk_directory(&self, dir: &Path) -> anyhow::Result<SyncReport> {
        let mut report = SyncReport::default();
        if !dir.exists() {
            debug!(dir = %dir.display(), "memory directory does not exist, skipping");
            return Ok(report);
        }

        let mut paths = Vec::new();
        // Stored sources under these paths are kept: the walk could not see them.
        let mut unreadable: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            match entry {
                Ok(e) if e.file_type().is_file() && is_markdown(e.path()) => {
                    paths.push(e.into_path());
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "skipping unreadable memory path");
                    report.skipped += 1;
                    unreadable.push(e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf));
                },
            }
        }

        let mut seen = HashSet::with_capacity(paths.len());
        for path in &paths {
            seen.insert(path.to_string_lossy().into_owned());
            match self.index_file(path).await {
                Ok(true) => report.files_updated += 1,
                Ok(false) => report.files_unchanged += 1,
                Err(e) if e.downcast_ref::<std::io::Error>().is_some() => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    report.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }

        for source in self.inner.store.list_sources().await? {
            let path = Path::new(&source);
            if path.starts_with(dir)
                && !seen.contains(&source)
                && !unreadable.iter().any(|p| path.starts_with(p))
            {
                info!(path = %source, "removing deleted file from memory");
                self.inner.store.delete_source(&source).await?;
                lock(&self.inner.file_hashes).remove(&source);
                lock(&self.inner.source_locks).remove(&source);
                report.files_removed += 1;
            }
        }

        info!(
            dir = %dir.display(),
            updated = report.files_updated,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            skipped = report.skipped,
            "memory directory synced"
        );
        Ok(report)
    }

    async fn run_sync(&self) -> anyhow::Result<SyncReport> {
        self.inner.dirty.store(false, Ordering::SeqCst);
        let mut total = SyncReport::default();
        for dir in &self.inner.config.source_dirs {
            match self.walk_directory(dir).await {
                Ok(report) => total.merge(&report),
                Err(e) => {
                    self.mark_dirty();
                    return Err(e);
                },
            }
        }
        Ok(total)
    }

    /// The in-flight sync, or a new one. The flag is `true` when a new pass was created.
    ///
    /// The pass runs on its own task, so it finishes even when every caller
    /// stops waiting for it.
    fn sync_future(&self) -> (SyncFuture, bool) {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(existing) = slot.as_ref() {
            return (existing.clone(), false);
        }
        let guard = ClearInFlight(self.clone());
        let handle = tokio::spawn(async move {
            let result = guard.0.run_sync().await;
            match &result {
                Ok(report) => debug!(?report, "memory sync finished"),
                Err(e) => warn!(error = %e, "memory sync failed"),
            }
            drop(guard);
            result.map_err(Arc::new)
        });
        let fut = async move {
            handle.await.unwrap_or_else(|e| {
                Err(Arc::new(anyhow::anyhow!("memory sync task failed: {e}")))
            })
        }
        .boxed()
        .shared();
        *slot = Some(fut.clone());
        (fut, true)
    }

    /// Sync every configured source directory.
    ///
    /// Callers arriving while a pass is running wait for that pass instead of
    /// starting another.
    pub async fn sync(&self) -> anyhow::Result<SyncReport> {
        let (fut, started) = self.sync_future();
        if !started {
            debug!("joining in-flight memory sync");
        }
        fut.await.map_err(|e| anyhow::anyhow!("{e:#}"))
    }

    /// Start a background sync if enabled, the index is dirty and nothing is running.
    /// Returns whether a sync was started; never waits for it.
    pub fn warm_session(&self) -> bool {
        if !self.inner.config.sync_on_session_start || !self.is_dirty() {
            return false;
        }
        let (_, started) = self.sync_future();
        if started {
            debug!("session warm-up sync started");
        }
        started
    }

    /// Hybrid search, then recency decay and diversity reranking as configured.
    /// `top_k == 0` uses the configured default.
    pub async fn search(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<SearchResult>> {
        let config = &self.inner.config;
        let k = if top_k == 0 {
            config.top_k
        } else {
            top_k
        };

        let mut results = search::hybrid_search(
            self.inner.store.as_ref(),
            self.inner.embedder.as_ref(),
            query,
            k,
            config.vector_weight,
            config.keyword_weight,
        )
        .await?;

        if config.decay.enabled {
            apply_decay(&mut results, query, &config.decay, now_ms());
            results.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        let mut results = if config.mmr.enabled {
            mmr_rerank(results, k, &config.mmr)
        } else {
            results.truncate(k);
            results
        };
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    /// Get a specific chunk by ID.
    pub async fn get_chunk(&self, id: &str) -> anyhow::Result<Option<ChunkRow>> {
        self.inner.store.get_chunk_by_id(id).await
    }

    pub async fn prune_embedding_cache(&self, keep: usize) -> anyhow::Result<usize> {
        let removed = self.inner.store.evict_embedding_cache(keep).await?;
        info!(removed, keep, "pruned embedding cache");
        Ok(removed)
    }

    pub async fn status(&self) -> anyhow::Result<MemoryStatus> {
        let store = &self.inner.store;
        Ok(MemoryStatus {
            total_sources: store.list_sources().await?.len(),
            total_chunks: store.count_chunks().await?,
            cached_embeddings: store.count_cached_embeddings().await?,
            embedding_model: self.inner.embedder.model_name().to_string(),
            dirty: self.is_dirty(),
        })
    }

    /// Mark the index dirty on every watcher event and sync until it is clean.
    /// Events arriving in one burst share a pass. The task ends when the
    /// channel closes.
    #[cfg(feature = "file-watcher")]
    pub fn watch(
        &self,
        mut events: tokio::sync::mpsc::UnboundedReceiver<crate::watcher::WatchEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(path = %event.path().display(), "memory source changed");
                this.mark_dirty();
                while events.try_recv().is_ok() {}

                // A pass already running when the change landed may have missed it.
                while this.is_dirty() {
                    if let Err(e) = this.sync().await {
                        warn!(error = %e, "sync after change failed");
                        break;
                    }
                }
            }
        })
    }
}
