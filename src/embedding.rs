//! Embedding provider implementations.
//!
//! [`HttpEmbeddingGenerator`] calls an OpenAI-compatible `/embeddings`
//! endpoint with batching and exponential-backoff retry:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The `disabled` provider refuses to construct; commands that need
//! embeddings surface that at startup rather than mid-run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use kb_retrieval_core::capabilities::EmbeddingGenerator;
use kb_retrieval_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

/// Embedding generator backed by an OpenAI-compatible HTTP API.
pub struct HttpEmbeddingGenerator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl HttpEmbeddingGenerator {
    /// Build from configuration. Requires `model` and `dims` to be set
    /// and the `OPENAI_API_KEY` environment variable to be present.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = match config.model.clone() {
            Some(m) => m,
            None => bail!("embedding.model is required for the openai provider"),
        };
        let dims = match config.dims {
            Some(d) => d,
            None => bail!("embedding.dims is required for the openai provider"),
        };
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) => k,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        #[derive(Deserialize)]
        struct Response {
            data: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            embedding: Vec<f32>,
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: Response = resp
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
                        if parsed.data.len() != texts.len() {
                            return Err(EmbeddingError::Provider(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                parsed.data.len()
                            )));
                        }
                        return Ok(parsed.data.into_iter().map(|i| i.embedding).collect());
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let text = resp.text().await.unwrap_or_default();
                    last_err = format!("HTTP {status}: {text}");
                    if !retryable {
                        return Err(EmbeddingError::Provider(last_err));
                    }
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
        }

        Err(EmbeddingError::Provider(format!(
            "retries exhausted: {last_err}"
        )))
    }
}

#[async_trait]
impl EmbeddingGenerator for HttpEmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let batch = self.request_batch(&[text.to_string()]).await?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Provider("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.request_batch(chunk).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Instantiate the configured embedding generator.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(HttpEmbeddingGenerator::from_config(config)?)),
        "disabled" => bail!(
            "embedding provider is disabled; set [embedding] provider in the config"
        ),
        other => bail!("unknown embedding provider: {other}"),
    }
}
