//! Core data models for the retrieval subsystem.
//!
//! These types flow through the document pipeline, the hybrid search
//! engine, and the migration coordinator. Tenant fields are typed and
//! validated at the ingestion boundary rather than carried in an open
//! metadata bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// Reserved organization id under which globally-visible content is
/// indexed. Every tenant's queries match it in addition to their own
/// organization id.
pub const GLOBAL_ORGANIZATION: &str = "global";

/// Content type tag for chunks produced from knowledge base documents.
pub const DOCUMENT_CONTENT_TYPE: &str = "document";

/// Visibility scope of a knowledge base document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Organization,
    Project,
}

impl Scope {
    /// Whether documents with this scope must carry a `scope_id`.
    pub fn requires_scope_id(&self) -> bool {
        !matches!(self, Scope::Global)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Organization => "organization",
            Scope::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "global" => Some(Scope::Global),
            "organization" => Some(Scope::Organization),
            "project" => Some(Scope::Project),
            _ => None,
        }
    }
}

/// Processing lifecycle of a knowledge base document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ProcessingStatus> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// A source artifact awaiting indexing.
///
/// Created on upload with status `pending`; the pipeline moves it through
/// `processing` to `completed` or `failed`. A failed document may be
/// resubmitted, re-entering `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseDocument {
    pub id: String,
    pub scope: Scope,
    /// Organization id for `organization` scope, project id for `project`
    /// scope, absent for `global`.
    pub scope_id: Option<String>,
    /// Owning organization for `project`-scoped documents. Derivable from
    /// `scope_id` for `organization` scope; unused for `global`.
    pub organization_id: Option<String>,
    pub title: String,
    /// Reference into the blob store holding the uploaded artifact.
    pub storage_ref: String,
    /// Populated by text extraction before the pipeline runs.
    pub extracted_text: Option<String>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBaseDocument {
    /// Check that the scope / scope_id pairing is coherent.
    pub fn validate_scope(&self) -> Result<(), ProcessingError> {
        match self.scope {
            Scope::Global => {
                if self.scope_id.is_some() {
                    return Err(ProcessingError::Validation(
                        "global documents must not carry a scope id".into(),
                    ));
                }
            }
            Scope::Organization | Scope::Project => {
                if self.scope_id.as_deref().map_or(true, |s| s.is_empty()) {
                    return Err(ProcessingError::Validation(format!(
                        "{} documents require a scope id",
                        self.scope.as_str()
                    )));
                }
                if self.scope == Scope::Project
                    && self.organization_id.as_deref().map_or(true, |s| s.is_empty())
                {
                    return Err(ProcessingError::Validation(
                        "project documents require an owning organization id".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Derive the tenant metadata under which this document's chunks are
    /// indexed. Global documents index under [`GLOBAL_ORGANIZATION`].
    pub fn tenant_metadata(&self) -> Result<RecordMetadata, ProcessingError> {
        self.validate_scope()?;
        let (organization_id, project_id) = match self.scope {
            Scope::Global => (GLOBAL_ORGANIZATION.to_string(), None),
            Scope::Organization => (
                self.scope_id.clone().unwrap_or_default(),
                None,
            ),
            Scope::Project => (
                self.organization_id.clone().unwrap_or_default(),
                self.scope_id.clone(),
            ),
        };
        let meta = RecordMetadata {
            organization_id,
            project_id,
            created_by: None,
            title: Some(self.title.clone()),
            source_ref: Some(self.storage_ref.clone()),
        };
        meta.validate().map_err(ProcessingError::Validation)?;
        Ok(meta)
    }
}

/// Typed tenant and provenance metadata attached to every embedding
/// record. The organization id is mandatory and enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub organization_id: String,
    pub project_id: Option<String>,
    pub created_by: Option<String>,
    pub title: Option<String>,
    pub source_ref: Option<String>,
}

impl RecordMetadata {
    pub fn validate(&self) -> Result<(), String> {
        if self.organization_id.trim().is_empty() {
            return Err("organization_id must not be empty".into());
        }
        Ok(())
    }
}

/// The logical identity of a piece of indexed content. Unit of migration
/// grouping and of idempotent re-indexing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub content_id: String,
    pub content_type: String,
}

impl ContentKey {
    pub fn new(content_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
        }
    }

    /// Content-addressed record id for one chunk of this content. Writing
    /// under the same id overwrites rather than duplicates.
    pub fn record_id(&self, chunk_index: i64) -> String {
        format!("{}/{}/{}", self.content_id, self.content_type, chunk_index)
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.content_id, self.content_type)
    }
}

/// One indexed chunk, as persisted in a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub content_id: String,
    pub content_type: String,
    pub chunk_index: i64,
    pub vector: Vec<f32>,
    pub content_text: String,
    pub metadata: RecordMetadata,
}

impl EmbeddingRecord {
    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.content_id.clone(), self.content_type.clone())
    }
}

/// Tenant scoping applied to every store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantFilter {
    pub organization_id: String,
    pub project_id: Option<String>,
}

impl TenantFilter {
    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: None,
        }
    }

    pub fn project(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: Some(project_id.into()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.organization_id.trim().is_empty() {
            return Err("organization_id is required".into());
        }
        Ok(())
    }

    /// Whether a record with the given metadata is visible under this
    /// filter. Globally-indexed content is visible to every tenant; a
    /// project filter narrows to project-specific plus organization-wide
    /// content.
    pub fn matches(&self, meta: &RecordMetadata) -> bool {
        let org_ok = meta.organization_id == self.organization_id
            || meta.organization_id == GLOBAL_ORGANIZATION;
        if !org_ok {
            return false;
        }
        match (&self.project_id, &meta.project_id) {
            (Some(wanted), Some(have)) => wanted == have,
            (Some(_), None) => true,
            (None, _) => true,
        }
    }
}

/// Per-source relevance signals carried on a search result. A signal is
/// absent when the corresponding stage did not score the result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceSignals {
    pub vector: Option<f64>,
    pub keyword: Option<f64>,
    pub rerank: Option<f64>,
}

/// A transient search result. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content_id: String,
    pub content_text: String,
    /// Fused score, or the reranker's score when reranking applied.
    pub score: f64,
    pub signals: SourceSignals,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(scope: Scope, scope_id: Option<&str>, org: Option<&str>) -> KnowledgeBaseDocument {
        KnowledgeBaseDocument {
            id: "doc-1".into(),
            scope,
            scope_id: scope_id.map(String::from),
            organization_id: org.map(String::from),
            title: "Refund policy".into(),
            storage_ref: "blob://kb/doc-1".into(),
            extracted_text: Some("text".into()),
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn scope_validation() {
        assert!(doc(Scope::Global, None, None).validate_scope().is_ok());
        assert!(doc(Scope::Global, Some("org-1"), None).validate_scope().is_err());
        assert!(doc(Scope::Organization, Some("org-1"), None).validate_scope().is_ok());
        assert!(doc(Scope::Organization, None, None).validate_scope().is_err());
        assert!(doc(Scope::Project, Some("proj-1"), Some("org-1")).validate_scope().is_ok());
        assert!(doc(Scope::Project, Some("proj-1"), None).validate_scope().is_err());
    }

    #[test]
    fn tenant_metadata_derivation() {
        let meta = doc(Scope::Organization, Some("org-1"), None)
            .tenant_metadata()
            .unwrap();
        assert_eq!(meta.organization_id, "org-1");
        assert_eq!(meta.project_id, None);

        let meta = doc(Scope::Project, Some("proj-1"), Some("org-1"))
            .tenant_metadata()
            .unwrap();
        assert_eq!(meta.organization_id, "org-1");
        assert_eq!(meta.project_id.as_deref(), Some("proj-1"));

        let meta = doc(Scope::Global, None, None).tenant_metadata().unwrap();
        assert_eq!(meta.organization_id, GLOBAL_ORGANIZATION);
    }

    #[test]
    fn record_id_is_content_addressed() {
        let key = ContentKey::new("doc-9", DOCUMENT_CONTENT_TYPE);
        assert_eq!(key.record_id(0), "doc-9/document/0");
        assert_eq!(key.record_id(3), "doc-9/document/3");
    }

    #[test]
    fn tenant_filter_isolation() {
        let meta = |org: &str, project: Option<&str>| RecordMetadata {
            organization_id: org.into(),
            project_id: project.map(String::from),
            created_by: None,
            title: None,
            source_ref: None,
        };

        let org_filter = TenantFilter::organization("org-a");
        assert!(org_filter.matches(&meta("org-a", None)));
        assert!(org_filter.matches(&meta("org-a", Some("proj-1"))));
        assert!(org_filter.matches(&meta(GLOBAL_ORGANIZATION, None)));
        assert!(!org_filter.matches(&meta("org-b", None)));

        let proj_filter = TenantFilter::project("org-a", "proj-1");
        assert!(proj_filter.matches(&meta("org-a", Some("proj-1"))));
        assert!(proj_filter.matches(&meta("org-a", None)));
        assert!(!proj_filter.matches(&meta("org-a", Some("proj-2"))));
        assert!(!proj_filter.matches(&meta("org-b", Some("proj-1"))));
    }

    #[test]
    fn empty_organization_rejected() {
        assert!(TenantFilter::organization("  ").validate().is_err());
        let meta = RecordMetadata {
            organization_id: String::new(),
            project_id: None,
            created_by: None,
            title: None,
            source_ref: None,
        };
        assert!(meta.validate().is_err());
    }
}
