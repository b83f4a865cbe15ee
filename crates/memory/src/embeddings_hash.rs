/// Offline embedding provider: deterministic vectors derived from SHA-256.
///
/// The vectors carry no semantic meaning; they keep indexing and search
/// functional when no remote provider is configured.
use {
    async_trait::async_trait,
    sha2::{Digest, Sha256},
};

use crate::embeddings::{EmbeddingProvider, l2_normalize};

pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());
        let mut out = Vec::with_capacity(self.dims);
        let mut block = 0u32;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if out.len() == self.dims {
                    break;
                }
                out.push(f32::from(byte) / 127.5 - 1.0);
            }
            block += 1;
        }
        // All-zero output is impossible in practice, but keep the unit-norm contract.
        if out.iter().all(|x| *x == 0.0) {
            out[0] = 1.0;
        }
        l2_normalize(&mut out);
        out
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "sha256-hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn norm(v: &[f32]) -> f64 {
        v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt()
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let provider = HashEmbeddingProvider::new(384);
        for text in ["", "a", "My timezone is EST", "long text ".repeat(500).as_str()] {
            let v = provider.embed(text).await.unwrap();
            assert_eq!(v.len(), 384);
            assert!((norm(&v) - 1.0).abs() < 1e-6, "norm for {text:?}");
        }
    }

    #[tokio::test]
    async fn deterministic_and_distinct() {
        let provider = HashEmbeddingProvider::default();
        let a1 = provider.embed("hello").await.unwrap();
        let a2 = provider.embed("hello").await.unwrap();
        let b = provider.embed("hello!").await.unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let provider = HashEmbeddingProvider::new(32);
        let texts = vec!["one".to_string(), "two".to_string(), "one".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], provider.embed("one").await.unwrap());
        assert_eq!(batch[1], provider.embed("two").await.unwrap());
        assert_eq!(batch[0], batch[2]);
    }

    #[tokio::test]
    async fn dimensions_not_multiple_of_digest() {
        let provider = HashEmbeddingProvider::new(50);
        assert_eq!(provider.embed("x").await.unwrap().len(), 50);
        assert_eq!(provider.dimensions(), 50);
    }
}
