//! Error taxonomy for the retrieval subsystem.
//!
//! Validation problems are detected before any store call and surfaced
//! synchronously. Search-path embedding and store errors abort the whole
//! search call. Reranker failures and per-group migration failures are
//! absorbed: the former degrades to the fused ordering, the latter is
//! recorded in the returned [`MigrationSummary`](crate::migrate::MigrationSummary).

/// Failure reported by an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),
}

/// Failure reported by a vector store, keyword index, or record source.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Failure reported by a reranker.
///
/// Never propagated out of a search call; the engine logs it and falls
/// back to the fused ordering.
#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("reranker error: {0}")]
    Provider(String),
}

/// Errors surfaced by [`SearchEngine::search`](crate::search::SearchEngine::search).
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Malformed or missing required input, detected before any store call.
    #[error("invalid search input: {0}")]
    Validation(String),

    /// The query could not be embedded. The whole search fails; the engine
    /// never silently returns keyword-only results.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The vector store or keyword index was unreachable.
    #[error("search backend failed: {0}")]
    Store(#[from] StoreError),

    /// The caller's cancellation signal fired. No partial results.
    #[error("search cancelled")]
    Cancelled,
}

/// Errors surfaced by the document processing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("invalid document: {0}")]
    Validation(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("chunk embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("indexing backend failed: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_into_search_error() {
        let err: SearchError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, SearchError::Store(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn embedding_error_converts_into_processing_error() {
        let err: ProcessingError = EmbeddingError::Provider("rate limited".into()).into();
        assert!(matches!(err, ProcessingError::Embedding(_)));
    }
}
