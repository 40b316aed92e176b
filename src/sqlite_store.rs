//! SQLite-backed implementations of the core capability traits.
//!
//! One `embeddings` table serves as the vector store (vectors as
//! little-endian f32 BLOBs, cosine ranking in Rust) and as a legacy
//! record source for migration; `records_fts` is the FTS5 keyword index;
//! `documents` holds knowledge base documents. Tenant scoping is applied
//! in SQL for the organization and in Rust for the residual project and
//! pass-through filters, mirroring the in-memory implementations exactly.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use kb_retrieval_core::capabilities::{
    DocumentStore, KeywordIndex, RecordSource, ScoredMatch, VectorStore,
};
use kb_retrieval_core::error::StoreError;
use kb_retrieval_core::models::{
    ContentKey, EmbeddingRecord, KnowledgeBaseDocument, ProcessingStatus, RecordMetadata, Scope,
    TenantFilter, GLOBAL_ORGANIZATION,
};
use kb_retrieval_core::store::filters_match;
use kb_retrieval_core::vectors::{blob_to_vec, cosine_similarity, vec_to_blob};

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn record_from_row(row: &SqliteRow) -> EmbeddingRecord {
    let blob: Vec<u8> = row.get("vector");
    EmbeddingRecord {
        id: row.get("id"),
        content_id: row.get("content_id"),
        content_type: row.get("content_type"),
        chunk_index: row.get("chunk_index"),
        vector: blob_to_vec(&blob),
        content_text: row.get("content_text"),
        metadata: RecordMetadata {
            organization_id: row.get("organization_id"),
            project_id: row.get("project_id"),
            created_by: row.get("created_by"),
            title: row.get("title"),
            source_ref: row.get("source_ref"),
        },
    }
}

// ============ Vector store ============

/// [`VectorStore`] over the `embeddings` table.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO embeddings (id, content_id, content_type, chunk_index,
                                        organization_id, project_id, created_by, title,
                                        source_ref, content_text, vector, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(content_id, content_type, chunk_index) DO UPDATE SET
                    id = excluded.id,
                    organization_id = excluded.organization_id,
                    project_id = excluded.project_id,
                    created_by = excluded.created_by,
                    title = excluded.title,
                    source_ref = excluded.source_ref,
                    content_text = excluded.content_text,
                    vector = excluded.vector,
                    dims = excluded.dims
                "#,
            )
            .bind(&record.id)
            .bind(&record.content_id)
            .bind(&record.content_type)
            .bind(record.chunk_index)
            .bind(&record.metadata.organization_id)
            .bind(&record.metadata.project_id)
            .bind(&record.metadata.created_by)
            .bind(&record.metadata.title)
            .bind(&record.metadata.source_ref)
            .bind(&record.content_text)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)
    }

    async fn query(
        &self,
        vector: &[f32],
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM embeddings WHERE organization_id IN (?, ?)",
        )
        .bind(&tenant.organization_id)
        .bind(GLOBAL_ORGANIZATION)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut matches: Vec<ScoredMatch> = rows
            .iter()
            .map(record_from_row)
            .filter(|r| tenant.matches(&r.metadata) && filters_match(r, filters))
            .map(|r| ScoredMatch {
                raw_score: cosine_similarity(vector, &r.vector) as f64,
                content_id: r.content_id,
                chunk_index: r.chunk_index,
                content_text: r.content_text,
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
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for id in ids {
            sqlx::query("DELETE FROM embeddings WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)
    }

    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM embeddings WHERE content_id = ? AND content_type = ? AND chunk_index >= ?",
        )
        .bind(&key.content_id)
        .bind(&key.content_type)
        .bind(start_index)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}

// ============ Keyword index ============

/// [`KeywordIndex`] over the `records_fts` FTS5 table.
pub struct SqliteKeywordIndex {
    pool: SqlitePool,
}

impl SqliteKeywordIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Build an FTS5 MATCH expression from free-form query text: quoted
/// tokens joined with OR, so punctuation never produces a syntax error.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

#[async_trait]
impl KeywordIndex for SqliteKeywordIndex {
    async fn query(
        &self,
        term: &str,
        tenant: &TenantFilter,
        filters: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, StoreError> {
        let Some(match_expr) = fts_match_expr(term) else {
            return Ok(Vec::new());
        };

        // Organization scoping happens in SQL; project and pass-through
        // filters are residual, so oversample when any are present.
        let fetch_k = if filters.is_empty() && tenant.project_id.is_none() {
            top_k
        } else {
            top_k * 4
        };

        let rows = sqlx::query(
            r#"
            SELECT record_id, content_id, content_type, chunk_index, organization_id,
                   project_id, created_by, source_ref, content_text, rank
            FROM records_fts
            WHERE records_fts MATCH ? AND organization_id IN (?, ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(&tenant.organization_id)
        .bind(GLOBAL_ORGANIZATION)
        .bind(fetch_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut matches = Vec::new();
        for row in &rows {
            let record = EmbeddingRecord {
                id: row.get("record_id"),
                content_id: row.get("content_id"),
                content_type: row.get("content_type"),
                chunk_index: row.get("chunk_index"),
                vector: Vec::new(),
                content_text: row.get("content_text"),
                metadata: RecordMetadata {
                    organization_id: row.get("organization_id"),
                    project_id: row.get("project_id"),
                    created_by: row.get("created_by"),
                    title: None,
                    source_ref: row.get("source_ref"),
                },
            };
            if !(tenant.matches(&record.metadata) && filters_match(&record, filters)) {
                continue;
            }
            let rank: f64 = row.get("rank");
            matches.push(ScoredMatch {
                content_id: record.content_id,
                chunk_index: record.chunk_index,
                content_text: record.content_text,
                // bm25 rank: lower is better; negate so higher is better.
                raw_score: -rank,
            });
        }
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn index_batch(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for record in records {
            // FTS5 has no upsert; replace by record id.
            sqlx::query("DELETE FROM records_fts WHERE record_id = ?")
                .bind(&record.id)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
            sqlx::query(
                r#"
                INSERT INTO records_fts (record_id, content_id, content_type, chunk_index,
                                         organization_id, project_id, created_by, source_ref,
                                         content_text)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.content_id)
            .bind(&record.content_type)
            .bind(record.chunk_index)
            .bind(&record.metadata.organization_id)
            .bind(&record.metadata.project_id)
            .bind(&record.metadata.created_by)
            .bind(&record.metadata.source_ref)
            .bind(&record.content_text)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)
    }

    async fn delete_chunks_from(
        &self,
        key: &ContentKey,
        start_index: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM records_fts WHERE content_id = ? AND content_type = ? AND chunk_index >= ?",
        )
        .bind(&key.content_id)
        .bind(&key.content_type)
        .bind(start_index)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}

// ============ Legacy record source ============

/// [`RecordSource`] reading an `embeddings` table in a legacy database.
pub struct SqliteRecordSource {
    pool: SqlitePool,
}

impl SqliteRecordSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for SqliteRecordSource {
    async fn enumerate(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM embeddings ORDER BY content_id, content_type, chunk_index")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM embeddings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // SQLite handles multi-row deletes fine; override the per-id fallback
    // with a single transaction.
    async fn delete_batch(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for id in ids {
            sqlx::query("DELETE FROM embeddings WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)
    }
}

// ============ Document store ============

/// [`DocumentStore`] over the `documents` table.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &SqliteRow) -> Result<KnowledgeBaseDocument, StoreError> {
    let scope_raw: String = row.get("scope");
    let scope = Scope::parse(&scope_raw)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown scope: {scope_raw}")))?;
    let status_raw: String = row.get("processing_status");
    let processing_status = ProcessingStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown status: {status_raw}")))?;
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");

    Ok(KnowledgeBaseDocument {
        id: row.get("id"),
        scope,
        scope_id: row.get("scope_id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        storage_ref: row.get("storage_ref"),
        extracted_text: row.get("extracted_text"),
        processing_status,
        processing_error: row.get("processing_error"),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeBaseDocument>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn put(&self, document: &KnowledgeBaseDocument) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, scope, scope_id, organization_id, title, storage_ref,
                                   extracted_text, processing_status, processing_error,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope = excluded.scope,
                scope_id = excluded.scope_id,
                organization_id = excluded.organization_id,
                title = excluded.title,
                storage_ref = excluded.storage_ref,
                extracted_text = excluded.extracted_text,
                processing_status = excluded.processing_status,
                processing_error = excluded.processing_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(document.scope.as_str())
        .bind(&document.scope_id)
        .bind(&document.organization_id)
        .bind(&document.title)
        .bind(&document.storage_ref)
        .bind(&document.extracted_text)
        .bind(document.processing_status.as_str())
        .bind(&document.processing_error)
        .bind(document.created_at.timestamp())
        .bind(document.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET processing_status = ?, processing_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        Ok(())
    }
}
