//! Reranker provider.
//!
//! [`HttpReranker`] posts `{model, query, documents}` to a rerank
//! endpoint (Cohere/Jina-compatible response shape) and returns one
//! relevance score per document in input order. Reranking is optional:
//! with `provider = "disabled"` no reranker is constructed, and the
//! search engine falls back to its fused ordering.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use kb_retrieval_core::capabilities::Reranker;
use kb_retrieval_core::error::RerankError;

use crate::config::RerankerConfig;

pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        let endpoint = match config.endpoint.clone() {
            Some(e) => e,
            None => bail!("reranker.endpoint is required for the http provider"),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: std::env::var("RERANKER_API_KEY").ok(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, RerankError> {
        #[derive(Deserialize)]
        struct Response {
            results: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            index: usize,
            relevance_score: f64,
        }

        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RerankError::Provider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RerankError::Provider(format!("HTTP {status}: {text}")));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| RerankError::Provider(e.to_string()))?;

        let mut scores = vec![0.0; documents.len()];
        for item in parsed.results {
            if item.index >= scores.len() {
                return Err(RerankError::Provider(format!(
                    "result index {} out of range",
                    item.index
                )));
            }
            scores[item.index] = item.relevance_score;
        }
        Ok(scores)
    }
}

/// Instantiate the configured reranker, or `None` when disabled.
pub fn create_reranker(config: &RerankerConfig) -> Result<Option<HttpReranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "http" => Ok(Some(HttpReranker::from_config(config)?)),
        other => bail!("unknown reranker provider: {other}"),
    }
}
