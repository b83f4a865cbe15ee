/// Persistent embedding cache in front of a (usually remote) provider.
///
/// Keys are `sha256(provider:model:text)` truncated, so identical text shares one
/// cached vector across chunks and sources.
use std::{collections::HashMap, sync::Arc};

use {async_trait::async_trait, tracing::debug};

use crate::{
    embeddings::{EmbeddingProvider, l2_normalize},
    error::Error,
    hashing::short_hash,
    schema::CacheRow,
    store::MemoryStore,
};

pub struct CachedEmbeddingProvider<P> {
    inner: P,
    store: Arc<dyn MemoryStore>,
}

impl<P: EmbeddingProvider> CachedEmbeddingProvider<P> {
    pub fn new(inner: P, store: Arc<dyn MemoryStore>) -> Self {
        Self { inner, store }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn cache_key(&self, text: &str) -> String {
        short_hash(&format!(
            "{}:{}:{}",
            self.inner.provider_key(),
            self.inner.model_name(),
            text
        ))
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbeddingProvider<P> {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding result"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();
        let cached = self.store.get_cached_embeddings(&keys).await?;
        let mut results: Vec<Option<Vec<f32>>> =
            keys.iter().map(|k| cached.get(k).cloned()).collect();

        // Parallel arrays: miss_texts[j] is embedded into fresh[j]; miss_slot maps key -> j.
        let mut miss_texts: Vec<String> = Vec::new();
        let mut miss_keys: Vec<String> = Vec::new();
        let mut miss_slot: HashMap<&str, usize> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            if results[i].is_none() && !miss_slot.contains_key(key.as_str()) {
                miss_slot.insert(key.as_str(), miss_texts.len());
                miss_texts.push(texts[i].clone());
                miss_keys.push(key.clone());
            }
        }

        let hits = results.iter().filter(|r| r.is_some()).count();
        debug!(
            hits,
            misses = miss_texts.len(),
            model = self.inner.model_name(),
            "embedding cache lookup"
        );

        if !miss_texts.is_empty() {
            let mut fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(Error::EmbeddingResponse(format!(
                    "provider returned {} embeddings for {} inputs",
                    fresh.len(),
                    miss_texts.len()
                ))
                .into());
            }
            for v in &mut fresh {
                l2_normalize(v);
            }

            let now = chrono::Utc::now().timestamp_millis();
            let rows: Vec<CacheRow> = miss_keys
                .iter()
                .zip(&fresh)
                .map(|(key, embedding)| CacheRow {
                    content_hash: key.clone(),
                    embedding: embedding.clone(),
                    provider: self.inner.provider_key().to_string(),
                    model: self.inner.model_name().to_string(),
                    updated_at: now,
                })
                .collect();
            self.store.put_cached_embeddings(&rows).await?;

            for (i, key) in keys.iter().enumerate() {
                if results[i].is_none()
                    && let Some(&j) = miss_slot.get(key.as_str())
                {
                    results[i] = Some(fresh[j].clone());
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| anyhow::anyhow!("embedding missing after cache fill")))
            .collect()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn provider_key(&self) -> &str {
        self.inner.provider_key()
    }
}
