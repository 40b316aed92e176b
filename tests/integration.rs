//! End-to-end tests over the SQLite adapters: index, tenant-scoped
//! hybrid search, re-index, and store-to-store migration — using the
//! deterministic hash embedder so no network or model is involved.

use std::collections::HashMap;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use kb_retrieval::db;
use kb_retrieval::sqlite_store::{
    SqliteDocumentStore, SqliteKeywordIndex, SqliteRecordSource, SqliteVectorStore,
};
use kb_retrieval_core::capabilities::{DocumentStore, KeywordIndex, RecordSource, VectorStore};
use kb_retrieval_core::migrate::{migrate, MigrationOptions};
use kb_retrieval_core::models::{
    EmbeddingRecord, KnowledgeBaseDocument, ProcessingStatus, RecordMetadata, Scope, TenantFilter,
};
use kb_retrieval_core::pipeline::DocumentPipeline;
use kb_retrieval_core::search::{SearchEngine, SearchOptions};
use kb_retrieval_core::test_utils::HashEmbedder;

async fn open_db(tmp: &TempDir, name: &str) -> sqlx::SqlitePool {
    let pool = db::connect(&tmp.path().join(name)).await.unwrap();
    db::init_schema(&pool).await.unwrap();
    pool
}

fn document(id: &str, org: &str, title: &str, text: &str) -> KnowledgeBaseDocument {
    KnowledgeBaseDocument {
        id: id.into(),
        scope: Scope::Organization,
        scope_id: Some(org.into()),
        organization_id: None,
        title: title.into(),
        storage_ref: format!("blob://kb/{id}"),
        extracted_text: Some(text.into()),
        processing_status: ProcessingStatus::Pending,
        processing_error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn index_then_search_is_tenant_scoped() {
    let tmp = TempDir::new().unwrap();
    let pool = open_db(&tmp, "kb.sqlite").await;

    let documents = SqliteDocumentStore::new(pool.clone());
    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = HashEmbedder::new(64);

    let pipeline =
        DocumentPipeline::new(&embedder, &vectors, &documents, 700).with_keyword_index(&keywords);

    let corpus = [
        ("doc-refunds", "org-a", "Refund Policy", "Our refund policy allows a refund request within 30 days.\n\nThe refund policy covers every plan and the refund is returned to the original payment method."),
        ("doc-shipping", "org-a", "Shipping", "Orders ship within two business days.\n\nExpedited shipping is available at checkout."),
        ("doc-secret", "org-b", "Internal Pricing", "Internal pricing discounts for enterprise refund negotiations."),
    ];
    for (id, org, title, text) in corpus {
        let mut doc = document(id, org, title, text);
        documents.put(&doc).await.unwrap();
        pipeline.index(&mut doc).await.unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
    }

    let engine = SearchEngine::new(&embedder, &vectors).with_keyword_index(&keywords);
    let options = SearchOptions {
        limit: 5,
        score_threshold: 0.1,
        use_reranking: false,
        ..Default::default()
    };
    let results = engine
        .search(
            "refund policy",
            &TenantFilter::organization("org-a"),
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 5);
    assert_eq!(results[0].content_id, "doc-refunds");
    for r in &results {
        assert!(r.score >= 0.1);
        assert_ne!(r.content_id, "doc-secret", "tenant isolation violated");
    }
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    pool.close().await;
}

#[tokio::test]
async fn reindex_shrink_removes_stale_chunks() {
    let tmp = TempDir::new().unwrap();
    let pool = open_db(&tmp, "kb.sqlite").await;

    let documents = SqliteDocumentStore::new(pool.clone());
    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = HashEmbedder::new(32);

    // A tiny chunk budget forces one chunk per paragraph.
    let pipeline =
        DocumentPipeline::new(&embedder, &vectors, &documents, 12).with_keyword_index(&keywords);

    let long_text = (0..6)
        .map(|i| format!("Paragraph number {i} with enough words to stand alone."))
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut doc = document("doc-grow", "org-a", "Growing Doc", &long_text);
    documents.put(&doc).await.unwrap();
    let summary = pipeline.index(&mut doc).await.unwrap();
    assert!(summary.chunks_indexed > 1);

    // Shrink and reindex through the boundary operation.
    doc.extracted_text = Some("One short paragraph now.".into());
    documents.put(&doc).await.unwrap();
    pipeline.reindex("doc-grow", "org-a").await.unwrap();

    let source = SqliteRecordSource::new(pool.clone());
    let remaining: Vec<EmbeddingRecord> = source
        .enumerate()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.content_id == "doc-grow")
        .collect();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].chunk_index, 0);

    let stored = documents.get("doc-grow").await.unwrap().unwrap();
    assert_eq!(stored.processing_status, ProcessingStatus::Completed);
    pool.close().await;
}

fn legacy_record(content_id: &str, idx: i64, text: &str, org: &str) -> EmbeddingRecord {
    EmbeddingRecord {
        id: format!("{content_id}/document/{idx}"),
        content_id: content_id.into(),
        content_type: "document".into(),
        chunk_index: idx,
        vector: vec![0.25; 8],
        content_text: text.into(),
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
async fn migration_between_sqlite_stores() {
    let tmp = TempDir::new().unwrap();
    let legacy_pool = open_db(&tmp, "legacy.sqlite").await;
    let target_pool = open_db(&tmp, "kb.sqlite").await;

    // Seed the legacy store with 8-dim vectors.
    let legacy_writer = SqliteVectorStore::new(legacy_pool.clone());
    legacy_writer
        .upsert_batch(&[
            legacy_record("content-a", 0, "alpha chunk one", "org-a"),
            legacy_record("content-a", 1, "alpha chunk two", "org-a"),
            legacy_record("content-b", 0, "bravo chunk", "org-a"),
        ])
        .await
        .unwrap();

    let source = SqliteRecordSource::new(legacy_pool.clone());
    let target = SqliteVectorStore::new(target_pool.clone());
    let target_reader = SqliteRecordSource::new(target_pool.clone());
    // The new store uses a different dimensionality.
    let embedder = HashEmbedder::new(24);

    // Dry run: both stores unchanged.
    let summary = migrate(&source, &embedder, &target, &MigrationOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.migrated, 3);
    assert_eq!(target_reader.enumerate().await.unwrap().len(), 0);
    assert_eq!(source.enumerate().await.unwrap().len(), 3);

    // Execute with cleanup.
    let options = MigrationOptions {
        dry_run: false,
        delete_after_success: true,
        concurrency: 2,
    };
    let summary = migrate(&source, &embedder, &target, &options).await.unwrap();
    assert_eq!(summary.migrated, 3);
    assert_eq!(summary.failed, 0);

    let migrated = target_reader.enumerate().await.unwrap();
    assert_eq!(migrated.len(), 3);
    for record in &migrated {
        assert_eq!(record.vector.len(), 24, "vector not re-embedded");
        assert_eq!(record.metadata.organization_id, "org-a");
    }
    assert_eq!(source.enumerate().await.unwrap().len(), 0);

    // Re-running over the migrated target is a no-op in effect.
    let empty_again = migrate(&source, &embedder, &target, &options).await.unwrap();
    assert_eq!(empty_again.total, 0);
    assert_eq!(target_reader.enumerate().await.unwrap().len(), 3);

    legacy_pool.close().await;
    target_pool.close().await;
}

#[tokio::test]
async fn keyword_index_filters_pass_through() {
    let tmp = TempDir::new().unwrap();
    let pool = open_db(&tmp, "kb.sqlite").await;

    let vectors = SqliteVectorStore::new(pool.clone());
    let keywords = SqliteKeywordIndex::new(pool.clone());
    let embedder = HashEmbedder::new(32);

    let mut faq = legacy_record("content-faq", 0, "how do refunds work", "org-a");
    faq.content_type = "faq".into();
    faq.id = "content-faq/faq/0".into();
    let doc = legacy_record("content-doc", 0, "refunds policy document", "org-a");
    vectors.upsert_batch(&[faq.clone(), doc.clone()]).await.unwrap();
    keywords.index_batch(&[faq, doc]).await.unwrap();

    let engine = SearchEngine::new(&embedder, &vectors).with_keyword_index(&keywords);
    let mut filters = HashMap::new();
    filters.insert("content_type".to_string(), "faq".to_string());
    let options = SearchOptions {
        score_threshold: 0.0,
        use_reranking: false,
        filters,
        ..Default::default()
    };

    let results = engine
        .search(
            "refunds",
            &TenantFilter::organization("org-a"),
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content_id, "content-faq");
    pool.close().await;
}
