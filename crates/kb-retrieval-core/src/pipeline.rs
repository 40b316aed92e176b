//! Document processing pipeline: chunk, embed, index.
//!
//! Turns an ingested document into content-addressed chunks in the vector
//! store and keyword index. Chunking is deterministic, so re-indexing a
//! document overwrites its chunks in place; chunks beyond the new count
//! are deleted explicitly when a document shrinks.
//!
//! Failures mark the document `failed` and are returned to the caller.
//! Partially-indexed chunks from a failed attempt are not rolled back:
//! the content key makes resubmission idempotent, so the remedy is to
//! resubmit, not to undo.

use serde::Serialize;

use crate::capabilities::{DocumentStore, EmbeddingGenerator, KeywordIndex, VectorStore};
use crate::chunk::chunk_text;
use crate::error::ProcessingError;
use crate::models::{
    ContentKey, EmbeddingRecord, KnowledgeBaseDocument, ProcessingStatus, RecordMetadata,
    DOCUMENT_CONTENT_TYPE,
};

/// Outcome of a successful indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub document_id: String,
    pub chunks_indexed: usize,
}

/// The indexing pipeline, parameterized over injected capabilities.
pub struct DocumentPipeline<'a> {
    embedder: &'a dyn EmbeddingGenerator,
    vector_store: &'a dyn VectorStore,
    keyword_index: Option<&'a dyn KeywordIndex>,
    documents: &'a dyn DocumentStore,
    max_chunk_tokens: usize,
}

impl<'a> DocumentPipeline<'a> {
    pub fn new(
        embedder: &'a dyn EmbeddingGenerator,
        vector_store: &'a dyn VectorStore,
        documents: &'a dyn DocumentStore,
        max_chunk_tokens: usize,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            keyword_index: None,
            documents,
            max_chunk_tokens,
        }
    }

    pub fn with_keyword_index(mut self, index: &'a dyn KeywordIndex) -> Self {
        self.keyword_index = Some(index);
        self
    }

    /// Index a document: `pending → processing → completed`, or `failed`
    /// with the error recorded on the document.
    pub async fn index(
        &self,
        document: &mut KnowledgeBaseDocument,
    ) -> Result<IndexSummary, ProcessingError> {
        let text = match document.extracted_text.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => {
                return Err(ProcessingError::Validation(
                    "document has no extracted text".into(),
                ))
            }
        };
        let metadata = document.tenant_metadata()?;

        self.transition(document, ProcessingStatus::Processing, None)
            .await?;

        match self.index_chunks(document, &text, metadata).await {
            Ok(summary) => {
                self.transition(document, ProcessingStatus::Completed, None)
                    .await?;
                tracing::info!(
                    document_id = %document.id,
                    chunks = summary.chunks_indexed,
                    "document indexed"
                );
                Ok(summary)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(persist_err) = self
                    .transition(document, ProcessingStatus::Failed, Some(&message))
                    .await
                {
                    tracing::warn!(
                        document_id = %document.id,
                        error = %persist_err,
                        "failed to persist failure status"
                    );
                }
                Err(err)
            }
        }
    }

    /// Re-index an existing document on behalf of an organization.
    ///
    /// The boundary operation for resubmitting a `failed` document or
    /// refreshing a `completed` one. A document outside the caller's
    /// organization is reported as not found.
    pub async fn reindex(
        &self,
        document_id: &str,
        organization_id: &str,
    ) -> Result<(), ProcessingError> {
        let mut document = self
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| ProcessingError::NotFound(document_id.to_string()))?;

        let owner = document.tenant_metadata()?.organization_id;
        if owner != organization_id {
            return Err(ProcessingError::NotFound(document_id.to_string()));
        }

        self.index(&mut document).await?;
        Ok(())
    }

    async fn index_chunks(
        &self,
        document: &KnowledgeBaseDocument,
        text: &str,
        metadata: RecordMetadata,
    ) -> Result<IndexSummary, ProcessingError> {
        let chunks = chunk_text(text, self.max_chunk_tokens);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let key = ContentKey::new(document.id.clone(), DOCUMENT_CONTENT_TYPE);
        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord {
                id: key.record_id(chunk.index),
                content_id: document.id.clone(),
                content_type: DOCUMENT_CONTENT_TYPE.to_string(),
                chunk_index: chunk.index,
                vector,
                content_text: chunk.text.clone(),
                metadata: metadata.clone(),
            })
            .collect();

        self.vector_store.upsert_batch(&records).await?;
        if let Some(index) = self.keyword_index {
            index.index_batch(&records).await?;
        }

        // Drop chunks left over from a longer previous version.
        let new_count = records.len() as i64;
        self.vector_store.delete_chunks_from(&key, new_count).await?;
        if let Some(index) = self.keyword_index {
            index.delete_chunks_from(&key, new_count).await?;
        }

        Ok(IndexSummary {
            document_id: document.id.clone(),
            chunks_indexed: records.len(),
        })
    }

    async fn transition(
        &self,
        document: &mut KnowledgeBaseDocument,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), ProcessingError> {
        document.processing_status = status;
        document.processing_error = error.map(String::from);
        self.documents
            .update_status(&document.id, status, error)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::{Scope, TenantFilter};
    use crate::store::memory::{MemoryDocumentStore, MemoryKeywordIndex, MemoryVectorStore};
    use crate::test_utils::{FailingEmbedder, HashEmbedder};

    fn document(id: &str, org: &str, text: &str) -> KnowledgeBaseDocument {
        KnowledgeBaseDocument {
            id: id.into(),
            scope: Scope::Organization,
            scope_id: Some(org.into()),
            organization_id: None,
            title: format!("{id} title"),
            storage_ref: format!("blob://kb/{id}"),
            extracted_text: Some(text.into()),
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_index_completes_document() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let keywords = MemoryKeywordIndex::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700)
            .with_keyword_index(&keywords);

        let mut doc = document("doc-1", "org-a", "Refunds are issued within 30 days.");
        documents.put(&doc).await.unwrap();

        let summary = pipeline.index(&mut doc).await.unwrap();
        assert_eq!(summary.chunks_indexed, 1);
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
        assert_eq!(doc.processing_error, None);

        let stored = documents.get("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
        assert_eq!(vectors.record_count(), 1);
        assert!(vectors.get("doc-1/document/0").is_some());
    }

    #[tokio::test]
    async fn records_carry_tenant_metadata() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700);

        let mut doc = document("doc-2", "org-b", "Billing happens monthly.");
        documents.put(&doc).await.unwrap();
        pipeline.index(&mut doc).await.unwrap();

        let record = vectors.get("doc-2/document/0").unwrap();
        assert_eq!(record.metadata.organization_id, "org-b");
        assert!(TenantFilter::organization("org-b").matches(&record.metadata));
        assert!(!TenantFilter::organization("org-a").matches(&record.metadata));
    }

    #[tokio::test]
    async fn missing_text_is_a_validation_error() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700);

        let mut doc = document("doc-3", "org-a", "");
        doc.extracted_text = None;
        documents.put(&doc).await.unwrap();

        let err = pipeline.index(&mut doc).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Validation(_)));
        // Never started processing.
        assert_eq!(doc.processing_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn embedding_failure_marks_document_failed() {
        let embedder = FailingEmbedder::new("quota exhausted");
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700);

        let mut doc = document("doc-4", "org-a", "Some text.");
        documents.put(&doc).await.unwrap();

        let err = pipeline.index(&mut doc).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Embedding(_)));
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        assert!(doc.processing_error.as_deref().unwrap().contains("quota exhausted"));

        let stored = documents.get("doc-4").await.unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn reindex_overwrites_in_place_without_duplicates() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700);

        let mut doc = document("doc-5", "org-a", "Original text about invoices.");
        documents.put(&doc).await.unwrap();
        pipeline.index(&mut doc).await.unwrap();
        let count_after_first = vectors.record_count();

        pipeline.index(&mut doc).await.unwrap();
        assert_eq!(vectors.record_count(), count_after_first);
    }

    #[tokio::test]
    async fn shrinking_document_deletes_stale_chunks() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let keywords = MemoryKeywordIndex::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 10)
            .with_keyword_index(&keywords);

        // A long document producing several chunks under the tiny budget.
        let long = vec!["paragraph of reasonable length here"; 8].join("\n\n");
        let mut doc = document("doc-6", "org-a", &long);
        documents.put(&doc).await.unwrap();
        pipeline.index(&mut doc).await.unwrap();
        let before = vectors.record_count();
        assert!(before > 1);

        doc.extracted_text = Some("short now".into());
        pipeline.index(&mut doc).await.unwrap();
        assert_eq!(vectors.record_count(), 1);
        assert!(vectors.get("doc-6/document/0").is_some());
        assert!(vectors.get("doc-6/document/1").is_none());
    }

    #[tokio::test]
    async fn failed_document_resubmission_reaches_completed() {
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();

        let mut doc = document("doc-7", "org-a", "Recoverable content.");
        documents.put(&doc).await.unwrap();

        let failing = FailingEmbedder::new("transient outage");
        let pipeline = DocumentPipeline::new(&failing, &vectors, &documents, 700);
        assert!(pipeline.index(&mut doc).await.is_err());
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);

        let healthy = HashEmbedder::new(16);
        let pipeline = DocumentPipeline::new(&healthy, &vectors, &documents, 700);
        pipeline.reindex("doc-7", "org-a").await.unwrap();

        let stored = documents.get("doc-7").await.unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
        assert_eq!(stored.processing_error, None);
    }

    #[tokio::test]
    async fn reindex_is_tenant_checked() {
        let embedder = HashEmbedder::new(16);
        let vectors = MemoryVectorStore::new();
        let documents = MemoryDocumentStore::new();
        let pipeline = DocumentPipeline::new(&embedder, &vectors, &documents, 700);

        let doc = document("doc-8", "org-a", "Private content.");
        documents.put(&doc).await.unwrap();

        let err = pipeline.reindex("doc-8", "org-b").await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));

        let err = pipeline.reindex("doc-missing", "org-a").await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));
    }
}
