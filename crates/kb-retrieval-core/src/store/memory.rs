//! In-memory capability implementations.
//!
//! `HashMap`/`BTreeMap` behind `std::sync::RwLock`; vector search is
//! brute-force cosine over all stored vectors. Behavior mirrors the
//! SQLite adapters (tenant scoping, pass-through filters, content-
//! addressed upserts) so tests exercise the same contracts production
//! code runs against.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::capabilities::{
    DocumentStore, KeywordIndex, RecordSource, ScoredMatch, VectorStore,
};
use crate::error::StoreError;
use crate::models::{
    ContentKey, EmbeddingRecord, KnowledgeBaseDocument, ProcessingStatus, TenantFilter,
};
use crate::vectors::cosine_similarity;

use super::filters_match;

type RecordKey = (String, String, i64);

fn record_key(r: &EmbeddingRecord) -> RecordKey {
    (r.content_id.clone(), r.content_type.clone(), r.chunk_index)
}

/// In-memory [`VectorStore`]. Upserts are keyed by the content key, so a
/// rewritten chunk replaces its predecessor.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: RwLock<BTreeMap<RecordKey, EmbeddingRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Stored record ids, sorted.
    pub fn record_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .unwrap()
            .values()
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<EmbeddingRecord> {
        self.records
            .read()
            .unwrap()
            .values()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record_key(record), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError> {
        let stored = self.records.read().unwrap();
        let mut matches: Vec<ScoredMatch> = stored
            .values()
            .filter(|r| tenant.matches(&r.metadata) && filters_match(r, filters))
            .map(|r| ScoredMatch {
                content_id: r.content_id.clone(),
                chunk_index: r.chunk_index,
                content_text: r.content_text.clone(),
                raw_score: cosine_similarity(vector, &r.vector) as f64,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut stored = self.records.write().unwrap();
        stored.retain(|_, r| !ids.contains(&r.id));
        Ok(())
    }

    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError> {
        let mut stored = self.records.write().unwrap();
        let before = stored.len();
        stored.retain(|(content_id, content_type, chunk_index), _| {
            !(content_id == &key.content_id
                && content_type == &key.content_type
                && *chunk_index >= start_index)
        });
        Ok((before - stored.len()) as u64)
    }
}

/// In-memory [`KeywordIndex`] scoring by query-term frequency.
#[derive(Default)]
pub struct MemoryKeywordIndex {
    records: RwLock<BTreeMap<RecordKey, EmbeddingRecord>>,
}

impl MemoryKeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[async_trait]
impl KeywordIndex for MemoryKeywordIndex {
    async fn query(
        &self,
        term: &str,
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError> {
        let needle = term.to_lowercase();
        let tokens: Vec<&str> = needle.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.records.read().unwrap();
        let mut matches: Vec<ScoredMatch> = stored
            .values()
            .filter(|r| tenant.matches(&r.metadata) && filters_match(r, filters))
            .filter_map(|r| {
                let haystack = r.content_text.to_lowercase();
                let hits = tokens.iter().filter(|t| haystack.contains(**t)).count();
                (hits > 0).then(|| ScoredMatch {
                    content_id: r.content_id.clone(),
                    chunk_index: r.chunk_index,
                    content_text: r.content_text.clone(),
                    raw_score: hits as f64,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn index_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record_key(record), record.clone());
        }
        Ok(())
    }

    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError> {
        let mut stored = self.records.write().unwrap();
        let before = stored.len();
        stored.retain(|(content_id, content_type, chunk_index), _| {
            !(content_id == &key.content_id
                && content_type == &key.content_type
                && *chunk_index >= start_index)
        });
        Ok((before - stored.len()) as u64)
    }
}

/// In-memory legacy [`RecordSource`].
///
/// Deliberately keeps the trait's default per-id `delete_batch` fallback,
/// exercising the path a batch-incapable store takes.
#[derive(Default)]
pub struct MemoryRecordSource {
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn records(&self) -> Vec<EmbeddingRecord> {
        self.records.read().unwrap().clone()
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn enumerate(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        Ok(self.records.read().unwrap().clone())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut stored = self.records.write().unwrap();
        let before = stored.len();
        stored.retain(|r| r.id != id);
        if stored.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, KnowledgeBaseDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeBaseDocument>, StoreError> {
        Ok(self.documents.read().unwrap().get(document_id).cloned())
    }

    async fn put(&self, document: &KnowledgeBaseDocument) -> Result<(), StoreError> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap();
        let document = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
        document.processing_status = status;
        document.processing_error = error.map(String::from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn record(content_id: &str, idx: i64, org: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            id: format!("{content_id}/document/{idx}"),
            content_id: content_id.into(),
            content_type: "document".into(),
            chunk_index: idx,
            vector: vec![1.0, 0.0],
            content_text: format!("chunk {idx} of {content_id}"),
            metadata: RecordMetadata {
                organization_id: org.into(),
                project_id: None,
                created_by: None,
                title: None,
                source_ref: None,
            },
        }
    }

    #[tokio::test]
    async fn upsert_is_content_addressed() {
        let store = MemoryVectorStore::new();
        store.upsert_batch(&[record("c1", 0, "org-a")]).await.unwrap();
        store.upsert_batch(&[record("c1", 0, "org-a")]).await.unwrap();
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn delete_chunks_from_trims_tail_only() {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[
                record("c1", 0, "org-a"),
                record("c1", 1, "org-a"),
                record("c1", 2, "org-a"),
                record("c2", 0, "org-a"),
            ])
            .await
            .unwrap();

        let removed = store
            .delete_chunks_from(&ContentKey::new("c1", "document"), 1)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.record_count(), 2);
        assert!(store.get("c1/document/0").is_some());
        assert!(store.get("c2/document/0").is_some());
    }

    #[tokio::test]
    async fn vector_query_scopes_by_tenant() {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[record("c1", 0, "org-a"), record("c2", 0, "org-b")])
            .await
            .unwrap();

        let matches = store
            .query(
                &[1.0, 0.0],
                &TenantFilter::organization("org-a"),
                &HashMap::new(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content_id, "c1");
    }

    #[tokio::test]
    async fn record_source_default_batch_delete_falls_back_per_id() {
        let source = MemoryRecordSource::seeded(vec![
            record("c1", 0, "org-a"),
            record("c1", 1, "org-a"),
            record("c2", 0, "org-a"),
        ]);
        source
            .delete_batch(&["c1/document/0".to_string(), "c1/document/1".to_string()])
            .await
            .unwrap();
        assert_eq!(source.record_count(), 1);
    }

    #[tokio::test]
    async fn update_status_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update_status("missing", ProcessingStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
