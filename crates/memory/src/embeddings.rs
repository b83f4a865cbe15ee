/// Provider-agnostic embedding trait for generating vectors from text.
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{EmbeddingProviderKind, MemoryConfig},
    embeddings_cache::CachedEmbeddingProvider,
    embeddings_hash::HashEmbeddingProvider,
    embeddings_openai::OpenAiEmbeddingProvider,
    error::Error,
    store::MemoryStore,
};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts, one vector per input in input order.
    /// Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The model name used by this provider (e.g. "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// The dimensionality of the embeddings produced.
    fn dimensions(&self) -> usize;

    /// Short provider identifier used in cache keys (e.g. "openai", "local").
    fn provider_key(&self) -> &str;
}

/// Scale `v` to unit Euclidean length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}

/// Dot product; equals cosine similarity for unit vectors. Mismatched lengths score 0.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

/// Build the embedder selected by `config`.
///
/// The remote provider is always wrapped in the persistent cache backed by `store`.
/// Selecting it without an API key fails before any network I/O.
pub fn create_provider(
    config: &MemoryConfig,
    store: Arc<dyn MemoryStore>,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding_provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(HashEmbeddingProvider::new(
            config.embedding_dimensions,
        ))),
        EmbeddingProviderKind::OpenAi => {
            let api_key = config
                .embedding_api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    Error::config("embedding_provider = \"openai\" requires embedding_api_key")
                })?;
            let remote = OpenAiEmbeddingProvider::new(api_key)
                .with_base_url(config.embedding_base_url.clone())
                .with_model(config.embedding_model.clone(), config.embedding_dimensions)
                .with_timeout(std::time::Duration::from_secs(config.request_timeout_secs))
                .with_max_retries(config.max_retries)
                .with_max_input_chars(config.max_chunk_chars);
            Ok(Arc::new(CachedEmbeddingProvider::new(remote, store)))
        },
    }
}
