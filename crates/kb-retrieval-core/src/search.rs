//! Hybrid search engine fusing vector similarity and keyword relevance.
//!
//! # Scoring
//!
//! 1. Embed the query once.
//! 2. Fetch an oversampled candidate set (3 × limit) from the vector
//!    store and, in hybrid mode, the keyword index — concurrently, both
//!    scoped by the tenant filter.
//! 3. Aggregate each source per content id (max raw score), then min-max
//!    normalize each source independently so the signals are comparable.
//! 4. Fuse: `vector_weight * v + keyword_weight * k`, a missing signal
//!    contributing 0.
//! 5. Sort fused score descending, content id ascending on ties.
//! 6. Optionally rerank the top `limit * 2` candidates; reranker failure
//!    degrades to the fused ordering and is only logged.
//! 7. Drop results below the score threshold, truncate to the limit.
//!
//! Embedding or store failure aborts the whole call — the engine never
//! silently falls back to keyword-only results. Cancellation propagates
//! to the embedding call, both store queries, and the reranker; a
//! cancelled search returns no partial results.

use std::collections::{BTreeSet, HashMap};

use tokio_util::sync::CancellationToken;

use crate::capabilities::{
    EmbeddingGenerator, KeywordIndex, Reranker, ScoredMatch, VectorStore,
};
use crate::error::SearchError;
use crate::models::{SearchResult, SourceSignals, TenantFilter};

/// Default number of results returned.
pub const DEFAULT_LIMIT: usize = 5;
/// Hard ceiling on the result count.
pub const MAX_LIMIT: usize = 50;

/// Candidates fetched per source, as a multiple of the limit.
const OVERSAMPLE_FACTOR: usize = 3;
/// Shortlist passed to the reranker, as a multiple of the limit.
const RERANK_MULTIPLIER: usize = 2;

/// Tuning knobs for one search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Final result count, clamped to [`MAX_LIMIT`].
    pub limit: usize,
    /// When false, only vector similarity is used and `keyword_weight`
    /// has no effect.
    pub use_hybrid: bool,
    /// Apply the reranker, if one is available.
    pub use_reranking: bool,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    /// Post-fusion floor; results scoring below it are dropped.
    pub score_threshold: f64,
    /// Passed through to both stores verbatim.
    pub filters: HashMap<String, String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            use_hybrid: true,
            use_reranking: true,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            score_threshold: 0.5,
            filters: HashMap::new(),
        }
    }
}

/// The hybrid search engine. Stateless; holds only the injected
/// capabilities, so any number of searches may run concurrently.
pub struct SearchEngine<'a> {
    embedder: &'a dyn EmbeddingGenerator,
    vector_store: &'a dyn VectorStore,
    keyword_index: Option<&'a dyn KeywordIndex>,
    reranker: Option<&'a dyn Reranker>,
}

impl<'a> SearchEngine<'a> {
    pub fn new(embedder: &'a dyn EmbeddingGenerator, vector_store: &'a dyn VectorStore) -> Self {
        Self {
            embedder,
            vector_store,
            keyword_index: None,
            reranker: None,
        }
    }

    pub fn with_keyword_index(mut self, index: &'a dyn KeywordIndex) -> Self {
        self.keyword_index = Some(index);
        self
    }

    pub fn with_reranker(mut self, reranker: &'a dyn Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Execute a tenant-scoped search.
    pub async fn search(
        &self,
        query: &str,
        tenant: &TenantFilter,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Validation("query must not be empty".into()));
        }
        tenant.validate().map_err(SearchError::Validation)?;
        if options.limit == 0 {
            return Err(SearchError::Validation("limit must be at least 1".into()));
        }
        let limit = options.limit.min(MAX_LIMIT);

        let query_vec = cancel
            .run_until_cancelled(self.embedder.embed(query))
            .await
            .ok_or(SearchError::Cancelled)??;

        let candidate_k = limit * OVERSAMPLE_FACTOR;
        let keyword_index = if options.use_hybrid {
            self.keyword_index
        } else {
            None
        };

        let (vector_matches, keyword_matches) = cancel
            .run_until_cancelled(async {
                match keyword_index {
                    Some(index) => futures::try_join!(
                        self.vector_store
                            .query(&query_vec, tenant, &options.filters, candidate_k),
                        index.query(query, tenant, &options.filters, candidate_k),
                    ),
                    None => self
                        .vector_store
                        .query(&query_vec, tenant, &options.filters, candidate_k)
                        .await
                        .map(|matches| (matches, Vec::new())),
                }
            })
            .await
            .ok_or(SearchError::Cancelled)??;

        let vector_candidates = best_by_content(vector_matches);
        let keyword_candidates = best_by_content(keyword_matches);

        let vector_norm = min_max_normalize(&vector_candidates);
        let keyword_norm = min_max_normalize(&keyword_candidates);

        let mut texts: HashMap<&str, &str> = HashMap::new();
        for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
            texts.insert(c.content_id.as_str(), c.content_text.as_str());
        }

        let content_ids: BTreeSet<&str> = vector_candidates
            .iter()
            .chain(keyword_candidates.iter())
            .map(|c| c.content_id.as_str())
            .collect();

        let mut results: Vec<SearchResult> = content_ids
            .into_iter()
            .map(|content_id| {
                let vector = vector_norm.get(content_id).copied();
                let keyword = keyword_norm.get(content_id).copied();
                let fused = options.vector_weight * vector.unwrap_or(0.0)
                    + options.keyword_weight * keyword.unwrap_or(0.0);
                SearchResult {
                    content_id: content_id.to_string(),
                    content_text: texts.get(content_id).copied().unwrap_or_default().to_string(),
                    score: fused,
                    signals: SourceSignals {
                        vector,
                        keyword,
                        rerank: None,
                    },
                }
            })
            .collect();

        sort_results(&mut results);

        if options.use_reranking {
            if let Some(reranker) = self.reranker {
                self.apply_rerank(reranker, query, &mut results, limit, cancel)
                    .await?;
            }
        }

        results.retain(|r| r.score >= options.score_threshold);
        results.truncate(limit);
        Ok(results)
    }

    /// Rerank the shortlist in place. Failures degrade to the fused
    /// ordering; only cancellation is propagated.
    async fn apply_rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        results: &mut Vec<SearchResult>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<(), SearchError> {
        let shortlist = results.len().min(limit * RERANK_MULTIPLIER);
        if shortlist == 0 {
            return Ok(());
        }
        let documents: Vec<String> = results[..shortlist]
            .iter()
            .map(|r| r.content_text.clone())
            .collect();

        match cancel
            .run_until_cancelled(reranker.rerank(query, &documents))
            .await
        {
            None => Err(SearchError::Cancelled),
            Some(Ok(scores)) if scores.len() == shortlist => {
                for (result, score) in results[..shortlist].iter_mut().zip(scores) {
                    result.score = score;
                    result.signals.rerank = Some(score);
                }
                sort_results(results);
                Ok(())
            }
            Some(Ok(scores)) => {
                tracing::warn!(
                    expected = shortlist,
                    returned = scores.len(),
                    "reranker returned wrong score count, keeping fused order"
                );
                Ok(())
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "rerank failed, keeping fused order");
                Ok(())
            }
        }
    }
}

struct ContentCandidate {
    content_id: String,
    content_text: String,
    raw_score: f64,
}

/// Collapse chunk-level matches to one candidate per content id, keeping
/// the best-scoring chunk's score and text.
fn best_by_content(matches: Vec<ScoredMatch>) -> Vec<ContentCandidate> {
    let mut best: HashMap<String, ContentCandidate> = HashMap::new();
    for m in matches {
        let keep = best
            .get(&m.content_id)
            .map_or(true, |existing| m.raw_score > existing.raw_score);
        if keep {
            best.insert(
                m.content_id.clone(),
                ContentCandidate {
                    content_id: m.content_id,
                    content_text: m.content_text,
                    raw_score: m.raw_score,
                },
            );
        }
    }
    best.into_values().collect()
}

/// Min-max normalize raw scores to `[0, 1]` within one candidate set.
/// A degenerate set where every score is equal normalizes to 1.0.
fn min_max_normalize(candidates: &[ContentCandidate]) -> HashMap<String, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }
    let min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - min) / (max - min)
            };
            (c.content_id.clone(), norm)
        })
        .collect()
}

/// Score descending, content id ascending on ties — deterministic for
/// identical inputs.
fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.content_id.cmp(&b.content_id))
    });
}
