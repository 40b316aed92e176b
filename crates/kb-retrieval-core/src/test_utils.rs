//! Deterministic capability doubles for tests.
//!
//! Kept as a public module so the application crate's integration tests
//! (and downstream users writing their own) can run the full pipeline
//! without a model provider or network access.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::capabilities::{EmbeddingGenerator, Reranker, ScoredMatch, VectorStore};
use crate::error::{EmbeddingError, RerankError, StoreError};
use crate::models::{ContentKey, EmbeddingRecord, TenantFilter};

/// Deterministic embedder: hashes each whitespace token into a bucket and
/// L2-normalizes the counts. Similar texts get similar vectors, identical
/// texts get identical vectors, and no network is involved.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        assert!(dims > 0);
        Self { dims }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize % self.dims;
            v[bucket] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingGenerator for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Embedder returning a fixed vector for every input. Lets a test pin the
/// query vector exactly.
pub struct StaticEmbedder {
    vector: Vec<f32>,
}

impl StaticEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl EmbeddingGenerator for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector.clone())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Embedder that always fails.
pub struct FailingEmbedder {
    message: String,
}

impl FailingEmbedder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Provider(self.message.clone()))
    }

    fn dimensions(&self) -> usize {
        0
    }
}

/// Embedder that fails for texts containing a marker and otherwise
/// behaves like [`HashEmbedder`]. Drives per-group failure scenarios.
pub struct MarkerEmbedder {
    inner: HashEmbedder,
    marker: String,
}

impl MarkerEmbedder {
    pub fn new(dims: usize, marker: impl Into<String>) -> Self {
        Self {
            inner: HashEmbedder::new(dims),
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for MarkerEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(&self.marker) {
            return Err(EmbeddingError::Provider(format!(
                "refusing text containing {:?}",
                self.marker
            )));
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Embedder whose future never resolves. Cancellation tests race the
/// token against it without flakes.
pub struct PendingEmbedder {
    dims: usize,
}

impl PendingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingGenerator for PendingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        futures::future::pending().await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Reranker replaying a fixed score sequence positionally.
pub struct StaticReranker {
    scores: Vec<f64>,
}

impl StaticReranker {
    pub fn new(scores: Vec<f64>) -> Self {
        assert!(!scores.is_empty());
        Self { scores }
    }
}

#[async_trait]
impl Reranker for StaticReranker {
    async fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<f64>, RerankError> {
        Ok((0..documents.len())
            .map(|i| self.scores[i % self.scores.len()])
            .collect())
    }
}

/// Reranker that always fails.
pub struct FailingReranker {
    message: String,
}

impl FailingReranker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Reranker for FailingReranker {
    async fn rerank(&self, _query: &str, _documents: &[String]) -> Result<Vec<f64>, RerankError> {
        Err(RerankError::Provider(self.message.clone()))
    }
}

/// Vector store whose every operation fails as unavailable.
pub struct FailingVectorStore {
    message: String,
}

impl FailingVectorStore {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable(self.message.clone())
    }
}

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn upsert_batch(&self, _records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _tenant: &TenantFilter,
        _filters: &HashMap<String, String>,
        _top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError> {
        Err(self.unavailable())
    }

    async fn delete_by_ids(&self, _ids: &[String]) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn delete_chunks_from(
        &self,
        _key: &ContentKey,
        _start_index: i64,
    ) -> Result<u64, StoreError> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed("refund policy details").await.unwrap();
        let b = embedder.embed("refund policy details").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn marker_embedder_fails_selectively() {
        let embedder = MarkerEmbedder::new(8, "poison");
        assert!(embedder.embed("clean text").await.is_ok());
        assert!(embedder.embed("poison text").await.is_err());
        // Default batch implementation propagates the first failure.
        let batch = vec!["clean".to_string(), "poison pill".to_string()];
        assert!(embedder.embed_batch(&batch).await.is_err());
    }
}
