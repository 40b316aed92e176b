//! Migration coordinator: re-embed and relocate indexed content between
//! embedding stores.
//!
//! The target store may use a different vector dimensionality than the
//! source, so records are not copied — each content group's chunk texts
//! are re-embedded against the target's generator and upserted under the
//! same content keys. Content-addressed writes make the whole operation
//! idempotent: re-running over an already-migrated group overwrites the
//! same records.
//!
//! One group's failure never aborts the run. The coordinator always
//! returns a summary; an operator inspects the per-group errors and
//! re-runs the same command safely.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::capabilities::{EmbeddingGenerator, RecordSource, VectorStore};
use crate::error::StoreError;
use crate::models::{ContentKey, EmbeddingRecord, RecordMetadata};

/// Run configuration. The entire semantic surface is the two flags;
/// `concurrency` only bounds the worker pool.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Preview group counts and validation problems without writing or
    /// deleting anything on either store.
    pub dry_run: bool,
    /// Remove a group's source records once its target upsert succeeded.
    pub delete_after_success: bool,
    /// Number of groups processed concurrently.
    pub concurrency: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            delete_after_success: false,
            concurrency: 4,
        }
    }
}

/// A group that could not be migrated, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct GroupError {
    pub key: ContentKey,
    pub error: String,
}

/// Aggregate outcome of one migration run.
#[derive(Debug, Default, Serialize)]
pub struct MigrationSummary {
    /// Records enumerated from the source.
    pub total: usize,
    /// Records successfully re-embedded and upserted (or, in a dry run,
    /// records that would have been).
    pub migrated: usize,
    /// Records belonging to failed groups.
    pub failed: usize,
    pub group_errors: Vec<GroupError>,
}

impl std::fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "migration: {} total, {} migrated, {} failed",
            self.total, self.migrated, self.failed
        )?;
        for ge in &self.group_errors {
            writeln!(f, "  {}: {}", ge.key, ge.error)?;
        }
        Ok(())
    }
}

enum GroupOutcome {
    Migrated { chunks: usize },
    Failed { chunks: usize, key: ContentKey, error: String },
    /// Migrated, but the source cleanup failed. The records are safely
    /// duplicated across both stores until a re-run.
    DeleteFailed { chunks: usize, key: ContentKey, error: String },
}

/// Migrate every record in `source` into `target`.
///
/// Fails only if the source cannot be enumerated at all; everything after
/// that is reported through the summary.
pub async fn migrate(
    source: &dyn RecordSource,
    embedder: &dyn EmbeddingGenerator,
    target: &dyn VectorStore,
    options: &MigrationOptions,
) -> Result<MigrationSummary, StoreError> {
    let records = source.enumerate().await?;
    let total = records.len();

    let mut groups: BTreeMap<ContentKey, Vec<EmbeddingRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key()).or_default().push(record);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| r.chunk_index);
    }
    tracing::info!(
        total,
        groups = groups.len(),
        dry_run = options.dry_run,
        "starting migration"
    );

    let outcomes: Vec<GroupOutcome> = stream::iter(groups)
        .map(|(key, group)| migrate_group(source, embedder, target, options, key, group))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut summary = MigrationSummary {
        total,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            GroupOutcome::Migrated { chunks } => summary.migrated += chunks,
            GroupOutcome::Failed { chunks, key, error } => {
                summary.failed += chunks;
                summary.group_errors.push(GroupError { key, error });
            }
            GroupOutcome::DeleteFailed { chunks, key, error } => {
                summary.migrated += chunks;
                summary.group_errors.push(GroupError { key, error });
            }
        }
    }
    // buffer_unordered completes out of order; keep the report stable.
    summary.group_errors.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(summary)
}

/// Process one content group end to end. The returned outcome is the only
/// channel back to the run — nothing here touches shared state.
async fn migrate_group(
    source: &dyn RecordSource,
    embedder: &dyn EmbeddingGenerator,
    target: &dyn VectorStore,
    options: &MigrationOptions,
    key: ContentKey,
    group: Vec<EmbeddingRecord>,
) -> GroupOutcome {
    let chunks = group.len();

    let metadata = match group_metadata(&group) {
        Ok(meta) => meta,
        Err(error) => {
            tracing::warn!(key = %key, %error, "group failed validation");
            return GroupOutcome::Failed { chunks, key, error };
        }
    };

    if options.dry_run {
        tracing::debug!(key = %key, chunks, "dry run, would migrate");
        return GroupOutcome::Migrated { chunks };
    }

    let texts: Vec<String> = group.iter().map(|r| r.content_text.clone()).collect();
    let vectors = match embedder.embed_batch(&texts).await {
        Ok(v) => v,
        Err(err) => {
            let error = err.to_string();
            tracing::warn!(key = %key, %error, "group re-embedding failed");
            return GroupOutcome::Failed { chunks, key, error };
        }
    };

    let migrated: Vec<EmbeddingRecord> = group
        .iter()
        .zip(vectors)
        .map(|(record, vector)| EmbeddingRecord {
            id: key.record_id(record.chunk_index),
            content_id: record.content_id.clone(),
            content_type: record.content_type.clone(),
            chunk_index: record.chunk_index,
            vector,
            content_text: record.content_text.clone(),
            metadata: metadata.clone(),
        })
        .collect();

    if let Err(err) = target.upsert_batch(&migrated).await {
        let error = err.to_string();
        tracing::warn!(key = %key, %error, "group upsert failed");
        return GroupOutcome::Failed { chunks, key, error };
    }

    if options.delete_after_success {
        // Only this group's ids — never another group's records.
        let ids: Vec<String> = group.iter().map(|r| r.id.clone()).collect();
        if let Err(err) = source.delete_batch(&ids).await {
            let error = format!("source cleanup failed: {err}");
            tracing::warn!(key = %key, %error, "migrated but not cleaned up");
            return GroupOutcome::DeleteFailed { chunks, key, error };
        }
    }

    GroupOutcome::Migrated { chunks }
}

/// Tenant context for a group, validated for consistency across all of
/// its records. Divergent or missing organization ids fail the group
/// explicitly rather than silently trusting the first record.
fn group_metadata(group: &[EmbeddingRecord]) -> Result<RecordMetadata, String> {
    let first = group
        .first()
        .ok_or_else(|| "empty group".to_string())?;
    let metadata = first.metadata.clone();
    metadata.validate()?;

    for record in &group[1..] {
        if record.metadata.organization_id != metadata.organization_id {
            return Err(format!(
                "inconsistent organization ids within group ({} vs {})",
                metadata.organization_id, record.metadata.organization_id
            ));
        }
        if record.metadata.project_id != metadata.project_id {
            return Err("inconsistent project ids within group".to_string());
        }
    }
    Ok(metadata)
}
