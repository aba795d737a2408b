//! Candidate reranking
//!
//! Rescoring/reordering engine combining:
//! - Base retrieval score (vector similarity from the store)
//! - Lexical overlap (token-set Jaccard against the query)
//! - Length normalization (rewards medium-length snippets)
//! - Source-preference boosts (soft nudge from intent detection)
//!
//! An external cross-encoder may be blended in as an alternate base score;
//! its absence or failure degrades to the local heuristics.

mod cross_encoder;

pub use cross_encoder::{CrossEncoderScorer, HttpCrossEncoder};

use crate::errors::DegradedReason;
use crate::metrics::{record_rerank, StageTimer};
use crate::store::StoreAccessor;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A retrieved chunk with a base relevance score.
///
/// Immutable once produced by retrieval; reranking builds new values rather
/// than mutating inputs. Request-scoped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Chunk ID
    pub id: String,

    /// Chunk text
    pub text: String,

    /// Base relevance score from retrieval
    pub score: f32,
}

/// Rerank options
#[derive(Debug, Clone, Default)]
pub struct RerankOptions {
    /// Sources to boost (lower-cased tags); advisory, never a filter
    pub preferred_sources: Vec<String>,

    /// Number of candidates to return, clamped to [1, 50].
    /// Defaults to the input length.
    pub top_k: Option<usize>,
}

/// Rerank result with a typed record of any degraded paths taken
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Reordered candidates, best first
    pub candidates: Vec<Candidate>,

    /// Fallbacks taken while reranking (empty on the happy path)
    pub degraded: Vec<DegradedReason>,
}

const TOP_K_MIN: usize = 1;
const TOP_K_MAX: usize = 50;

const WEIGHT_BASE: f32 = 0.7;
const WEIGHT_JACCARD: f32 = 0.2;
const WEIGHT_LENGTH: f32 = 0.1;
// Additive on top of the weighted sum; composite may exceed 1.0 for
// preferred sources. Intentional: only the sort order is observed.
const SOURCE_BOOST: f32 = 0.1;

const LEN_CLAMP_MIN: f32 = 50.0;
const LEN_CLAMP_MAX: f32 = 800.0;
const LEN_PEAK: f32 = 300.0;

/// Candidate reranker
pub struct Reranker {
    store: Arc<dyn StoreAccessor>,
    scorer: Option<Arc<dyn CrossEncoderScorer>>,
    blend_weight: f32,
}

impl Reranker {
    /// Create a reranker over a store accessor, heuristics only
    pub fn new(store: Arc<dyn StoreAccessor>) -> Self {
        Self {
            store,
            scorer: None,
            blend_weight: 0.5,
        }
    }

    /// Attach a cross-encoder; its scores replace the base score at
    /// `blend_weight` (clamped to [0, 1])
    pub fn with_scorer(mut self, scorer: Arc<dyn CrossEncoderScorer>, blend_weight: f32) -> Self {
        self.scorer = Some(scorer);
        self.blend_weight = blend_weight.clamp(0.0, 1.0);
        self
    }

    /// Rerank candidates, best first, truncated to `top_k`.
    ///
    /// Never fails: collaborator problems degrade to local heuristics.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        options: &RerankOptions,
    ) -> Vec<Candidate> {
        self.rerank_with_report(query, candidates, options)
            .await
            .candidates
    }

    /// Rerank and report which degraded paths, if any, were taken
    pub async fn rerank_with_report(
        &self,
        query: &str,
        candidates: &[Candidate],
        options: &RerankOptions,
    ) -> RerankOutcome {
        let timer = StageTimer::start();
        let mut degraded = Vec::new();

        if candidates.is_empty() {
            record_rerank(timer.elapsed_secs(), 0, false);
            return RerankOutcome {
                candidates: Vec::new(),
                degraded,
            };
        }

        let top_k = options
            .top_k
            .unwrap_or(candidates.len())
            .clamp(TOP_K_MIN, TOP_K_MAX);

        // Optional cross-encoder augmentation over the base scores
        let base_scores = self
            .augmented_base_scores(query, candidates, &mut degraded)
            .await;

        let preferred: Vec<String> = options
            .preferred_sources
            .iter()
            .map(|s| s.to_lowercase())
            .collect();

        // Source metadata, resolved once per id within this call
        let sources = if preferred.is_empty() {
            HashMap::new()
        } else {
            self.resolve_sources(candidates, &mut degraded).await
        };

        let query_tokens = tokenize(query);

        let mut scored: Vec<(f32, Candidate)> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let overlap = jaccard(&query_tokens, &tokenize(&candidate.text));
                let len_norm = length_norm(candidate.text.chars().count());

                let source_boost = sources
                    .get(&candidate.id)
                    .filter(|source| preferred.contains(source))
                    .map(|_| SOURCE_BOOST)
                    .unwrap_or(0.0);

                let composite = WEIGHT_BASE * base_scores[i]
                    + WEIGHT_JACCARD * overlap
                    + WEIGHT_LENGTH * len_norm
                    + source_boost;

                (composite, candidate.clone())
            })
            .collect();

        // Stable sort: ties keep original relative order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        debug!(
            candidates = candidates.len(),
            returned = scored.len(),
            degraded = degraded.len(),
            "Rerank complete"
        );

        record_rerank(timer.elapsed_secs(), candidates.len(), !degraded.is_empty());

        RerankOutcome {
            candidates: scored.into_iter().map(|(_, c)| c).collect(),
            degraded,
        }
    }

    /// Base scores, with the cross-encoder blended in when it is healthy
    async fn augmented_base_scores(
        &self,
        query: &str,
        candidates: &[Candidate],
        degraded: &mut Vec<DegradedReason>,
    ) -> Vec<f32> {
        let local: Vec<f32> = candidates.iter().map(|c| c.score).collect();

        let Some(scorer) = &self.scorer else {
            return local;
        };

        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        match scorer.score(query, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => local
                .iter()
                .zip(scores)
                .map(|(base, ce)| (1.0 - self.blend_weight) * base + self.blend_weight * ce)
                .collect(),
            Ok(scores) => {
                degraded.push(DegradedReason::ScorerCountMismatch {
                    expected: candidates.len(),
                    actual: scores.len(),
                });
                local
            }
            Err(e) => {
                degraded.push(DegradedReason::ScorerUnavailable {
                    message: e.to_string(),
                });
                local
            }
        }
    }

    /// Resolve each candidate's source tag; failures degrade to no boost
    async fn resolve_sources(
        &self,
        candidates: &[Candidate],
        degraded: &mut Vec<DegradedReason>,
    ) -> HashMap<String, String> {
        let ids: BTreeSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();

        let lookups = ids
            .iter()
            .map(|id| async move { (*id, self.store.chunk_with_doc(id).await) });

        let mut sources = HashMap::new();
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(Some(meta)) => {
                    sources.insert(id.to_string(), meta.source.to_lowercase());
                }
                Ok(None) => {
                    sources.insert(id.to_string(), String::new());
                }
                Err(_) => {
                    degraded.push(DegradedReason::MetadataUnavailable {
                        chunk_id: id.to_string(),
                    });
                    sources.insert(id.to_string(), String::new());
                }
            }
        }

        sources
    }
}

/// Case-normalized token set: alphanumeric runs, whitespace/punctuation
/// delimited
fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity over token sets, in [0, 1]
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

/// Length normalization term: clamp to [50, 800], peak at 300
fn length_norm(len: usize) -> f32 {
    let clamped = (len as f32).clamp(LEN_CLAMP_MIN, LEN_CLAMP_MAX);
    1.0 - (clamped - LEN_PEAK).abs() / LEN_PEAK
}
