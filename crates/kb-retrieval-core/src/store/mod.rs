//! Store implementations shipped with the core crate.
//!
//! Production deployments use the SQLite adapters in the application
//! crate; the in-memory implementations here back tests and embedded use.

pub mod memory;

use std::collections::HashMap;

use crate::models::EmbeddingRecord;

/// Apply pass-through filters to a record.
///
/// Filters arrive as an opaque key/value map and each store interprets
/// the keys it recognizes (`content_type`, `created_by`, `source_ref`);
/// unrecognized keys are ignored. All adapters follow this contract so a
/// filter map behaves identically against either retrieval store.
pub fn filters_match(record: &EmbeddingRecord, filters: &HashMap<String, String>) -> bool {
    for (key, value) in filters {
        let matched = match key.as_str() {
            "content_type" => record.content_type == *value,
            "created_by" => record.metadata.created_by.as_deref() == Some(value.as_str()),
            "source_ref" => record.metadata.source_ref.as_deref() == Some(value.as_str()),
            _ => {
                tracing::debug!(filter = %key, "ignoring unrecognized filter key");
                true
            }
        };
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn record(content_type: &str, created_by: Option<&str>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: "c/d/0".into(),
            content_id: "c".into(),
            content_type: content_type.into(),
            chunk_index: 0,
            vector: vec![],
            content_text: String::new(),
            metadata: RecordMetadata {
                organization_id: "org-a".into(),
                project_id: None,
                created_by: created_by.map(String::from),
                title: None,
                source_ref: None,
            },
        }
    }

    #[test]
    fn recognized_keys_filter() {
        let r = record("document", Some("user-1"));
        let mut filters = HashMap::new();
        filters.insert("content_type".to_string(), "document".to_string());
        assert!(filters_match(&r, &filters));
        filters.insert("created_by".to_string(), "user-2".to_string());
        assert!(!filters_match(&r, &filters));
    }

    #[test]
    fn unrecognized_keys_ignored() {
        let r = record("document", None);
        let mut filters = HashMap::new();
        filters.insert("color".to_string(), "blue".to_string());
        assert!(filters_match(&r, &filters));
    }
}
