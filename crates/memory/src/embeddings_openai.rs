/// OpenAI embeddings provider using the `/v1/embeddings` endpoint.
use std::time::Duration;

use async_trait::async_trait;
use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    embeddings::{EmbeddingProvider, l2_normalize},
    error::Error,
};

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: secrecy::Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    max_input_chars: usize,
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: secrecy::Secret::new(api_key),
            base_url: normalize_base_url("https://api.openai.com"),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            max_input_chars: 8000,
        }
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = normalize_base_url(&url);
        self
    }

    /// Per-attempt request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries after the first attempt for timeouts, connection errors, 429 and 5xx.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry; doubles on each further attempt.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Inputs longer than this many characters are truncated before sending.
    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max.max(1);
        self
    }

    fn prepare_inputs(&self, texts: &[String]) -> Vec<String> {
        texts
            .iter()
            .map(|t| {
                if t.chars().count() > self.max_input_chars {
                    debug!(
                        chars = t.chars().count(),
                        max = self.max_input_chars,
                        "truncating oversized embedding input"
                    );
                    t.chars().take(self.max_input_chars).collect()
                } else {
                    t.clone()
                }
            })
            .collect()
    }

    async fn send_once(&self, req: &EmbeddingRequest<'_>) -> Result<EmbeddingResponse, Attempt> {
        let resp = self
            .client
            .post(embeddings_endpoint(&self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                Attempt::new(anyhow::Error::from(e), retryable)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(Attempt::new(
                Error::EmbeddingRequest {
                    status: status.as_u16(),
                    body,
                }
                .into(),
                retryable,
            ));
        }

        resp.json::<EmbeddingResponse>()
            .await
            .map_err(|e| Attempt::new(Error::EmbeddingResponse(e.to_string()).into(), false))
    }
}

/// Outcome of one failed HTTP attempt.
struct Attempt {
    error: anyhow::Error,
    retryable: bool,
}

impl Attempt {
    fn new(error: anyhow::Error, retryable: bool) -> Self {
        Self { error, retryable }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Put response entries back in input order and check the count.
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(Error::EmbeddingResponse(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        ))
        .into());
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    Ok(data
        .into_iter()
        .map(|d| {
            let mut v = d.embedding;
            l2_normalize(&mut v);
            v
        })
        .collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.prepare_inputs(texts);
        let req = EmbeddingRequest {
            model: &self.model,
            input: &input,
        };

        let mut attempt = 0u32;
        loop {
            match self.send_once(&req).await {
                Ok(resp) => return order_embeddings(resp.data, texts.len()),
                Err(failed) if failed.retryable && attempt < self.max_retries => {
                    let delay = self.retry_backoff.saturating_mul(1 << attempt.min(16));
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failed.error,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(failed) => return Err(failed.error),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use {super::*, mockito::Matcher, serde_json::json};

    fn provider(server: &mockito::ServerGuard) -> OpenAiEmbeddingProvider {
        OpenAiEmbeddingProvider::new("sk-test".into())
            .with_base_url(server.url())
            .with_model("test-model".into(), 2)
            .with_retry_backoff(Duration::from_millis(1))
    }

    #[test]
    fn endpoint_from_host_base_uses_v1_embeddings() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_from_v1_base_appends_embeddings_once() {
        assert_eq!(
            embeddings_endpoint("https://llm.example.com/v1/"),
            "https://llm.example.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_preserves_explicit_embeddings_url() {
        assert_eq!(
            embeddings_endpoint("https://api.example.com/v1/embeddings"),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[tokio::test]
    async fn batch_request_is_normalized_and_reordered() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Json(json!({"model": "test-model", "input": ["a", "b"]})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"data": [
                    {"index": 1, "embedding": [0.0, 2.0]},
                    {"index": 0, "embedding": [3.0, 4.0]}
                ]})
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let out = provider(&server)
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(out.len(), 2);
        assert!((out[0][0] - 0.6).abs() < 1e-6 && (out[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(out[1], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn client_error_surfaces_body_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(400)
            .with_body("bad input: too long")
            .expect(1)
            .create_async()
            .await;

        let err = provider(&server).embed("x").await.unwrap_err();
        mock.assert_async().await;
        match err.downcast_ref::<Error>() {
            Some(Error::EmbeddingRequest { status, body }) => {
                assert_eq!(*status, 400);
                assert!(body.contains("too long"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_fail() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let err = provider(&server)
            .with_max_retries(2)
            .embed("x")
            .await
            .unwrap_err();
        mock.assert_async().await;
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(json!({"data": [{"embedding": [1.0, 0.0]}]}).to_string())
            .create_async()
            .await;

        let err = provider(&server)
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmbeddingResponse(_))
        ));
    }

    #[tokio::test]
    async fn oversized_input_is_truncated() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_body(Matcher::PartialJson(json!({"input": ["abcd"]})))
            .with_status(200)
            .with_body(json!({"data": [{"embedding": [1.0, 0.0]}]}).to_string())
            .expect(1)
            .create_async()
            .await;

        provider(&server)
            .with_max_input_chars(4)
            .embed("abcdefgh")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let provider = OpenAiEmbeddingProvider::new("sk".into()).with_base_url("http://127.0.0.1:9".into());
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
