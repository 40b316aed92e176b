//! Capability traits for the external collaborators of the retrieval
//! subsystem.
//!
//! The search engine, document pipeline, and migration coordinator are
//! written against these traits so that any conforming implementation may
//! be substituted — SQLite-backed adapters in production, the in-memory
//! implementations in [`store::memory`](crate::store::memory) for tests
//! and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{EmbeddingError, RerankError, StoreError};
use crate::models::{
    ContentKey, EmbeddingRecord, KnowledgeBaseDocument, ProcessingStatus, TenantFilter,
};

/// A scored candidate returned by a retrieval store, at chunk granularity.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub content_id: String,
    pub chunk_index: i64,
    pub content_text: String,
    /// Raw backend score (cosine similarity, BM25 rank, ...). Comparable
    /// only within one candidate set; callers normalize before fusing.
    pub raw_score: f64,
}

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, one vector per input, in input order.
    ///
    /// The default implementation embeds sequentially; providers with a
    /// batch API should override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimensionality of the vectors this generator produces.
    fn dimensions(&self) -> usize;
}

/// Persists vectors with tenant-scoped metadata.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records. Writes are content-addressed: a record
    /// with an existing (content_id, content_type, chunk_index) replaces
    /// the stored one.
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError>;

    /// Similarity query scoped by tenant, returning up to `top_k` matches
    /// ranked by raw score descending.
    async fn query(
        &self,
        vector: &[f32],
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Remove chunks of one content item at indices >= `start_index`.
    /// Used by re-indexing to drop stale chunks when a document shrinks.
    /// Returns the number of records removed.
    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError>;
}

/// Persists text for term-based lookup.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn query(
        &self,
        term: &str,
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError>;

    /// Index records for keyword lookup, content-addressed like the
    /// vector store.
    async fn index_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError>;

    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError>;
}

/// Optional higher-cost relevance model applied to a small shortlist.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each candidate document against the query. Returns one score
    /// per input, in input order.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, RerankError>;
}

/// A legacy store that migration reads from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<EmbeddingRecord>, StoreError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError>;

    /// Delete several records. Sources with batch support should override
    /// this; the default falls back to one delete per id, which is slower
    /// but behaviorally identical.
    async fn delete_batch(&self, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.delete_by_id(id).await?;
        }
        Ok(())
    }
}

/// Persistence boundary for knowledge base documents and their
/// processing-status transitions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeBaseDocument>, StoreError>;

    async fn put(&self, document: &KnowledgeBaseDocument) -> Result<(), StoreError>;

    /// Update a document's processing status and error message. Fails with
    /// [`StoreError::NotFound`] if the document does not exist.
    async fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}
