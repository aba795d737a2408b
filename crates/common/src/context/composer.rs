//! Context Composer - builds a citation-annotated context window
//!
//! Provides:
//! - Per-snippet truncation and trimming
//! - Exact-match deduplication on normalized text
//! - Citation labels matched one-to-one with snippet blocks

use crate::metrics::record_compose;
use crate::rerank::Candidate;
use crate::store::StoreAccessor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Citation entry, parallel to the `[#N ...]` labels in the context text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    /// 1-based label number, strictly increasing
    pub idx: usize,

    /// Chunk ID
    pub id: String,

    /// Resolved source tag, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Resolved document title, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Final structure handed to generation.
///
/// Invariant: `citations.len()` equals the number of snippet blocks in
/// `context_text`, and `idx` values are 1-based and strictly increasing,
/// matching the in-text labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposedContext {
    /// Citation-annotated context window
    pub context_text: String,

    /// Citations, one per snippet block
    pub citations: Vec<Citation>,
}

/// Compose options; out-of-range values are clamped, never rejected
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Global snippet-count cap, clamped to [1, 12]
    pub max_snippets: usize,

    /// Per-snippet truncation in characters, clamped to [80, 800]
    pub max_chars_per_snippet: usize,

    /// Skip candidates whose normalized text was already included
    pub dedup: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            max_snippets: 6,
            max_chars_per_snippet: 260,
            dedup: true,
        }
    }
}

const MAX_SNIPPETS_RANGE: (usize, usize) = (1, 12);
const MAX_CHARS_RANGE: (usize, usize) = (80, 800);

/// Build a single citation-annotated context string from ranked candidates.
///
/// Candidates are taken in the given order (assumed already ranked). Store
/// lookup failures degrade to `src=unknown`; nothing here ever fails.
pub async fn compose_cited_context(
    store: &dyn StoreAccessor,
    candidates: &[Candidate],
    options: &ComposeOptions,
) -> ComposedContext {
    let max_snippets = options
        .max_snippets
        .clamp(MAX_SNIPPETS_RANGE.0, MAX_SNIPPETS_RANGE.1);
    let max_chars = options
        .max_chars_per_snippet
        .clamp(MAX_CHARS_RANGE.0, MAX_CHARS_RANGE.1);

    let mut seen: HashSet<String> = HashSet::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut citations: Vec<Citation> = Vec::new();

    for candidate in candidates {
        if blocks.len() >= max_snippets {
            break;
        }

        // Dedup state is local to this call, never cross-request
        if options.dedup {
            let normalized = normalize_text(&candidate.text);
            if !seen.insert(normalized) {
                continue;
            }
        }

        let body: String = candidate.text.chars().take(max_chars).collect();
        let body = body.trim();

        // Metadata lookup failures degrade to unknown, never abort
        let meta = store.chunk_with_doc(&candidate.id).await.ok().flatten();
        let source = meta.as_ref().map(|m| m.source.clone());
        let title = meta.and_then(|m| m.title);

        let idx = blocks.len() + 1;
        let mut label = format!(
            "[#{} score={:.3} src={}",
            idx,
            candidate.score,
            source.as_deref().unwrap_or("unknown")
        );
        if let Some(title) = &title {
            label.push_str(&format!(" title={}", title));
        }
        label.push(']');

        blocks.push(format!("{}\n{}", label, body));
        citations.push(Citation {
            idx,
            id: candidate.id.clone(),
            source,
            title,
        });
    }

    debug!(
        candidates = candidates.len(),
        snippets = citations.len(),
        "Context composed"
    );
    record_compose(citations.len());

    ComposedContext {
        context_text: blocks.join("\n\n"),
        citations,
    }
}

/// Trim and collapse internal whitespace for exact-match dedup
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkMetadata, InMemoryStore};

    fn candidate(id: &str, text: &str, score: f32) -> Candidate {
        Candidate {
            id: id.to_string(),
            text: text.to_string(),
            score,
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_is_empty_context() {
        let store = InMemoryStore::new();
        let composed = compose_cited_context(&store, &[], &ComposeOptions::default()).await;
        assert_eq!(composed.context_text, "");
        assert!(composed.citations.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_scenario() {
        // Two near-identical long candidates plus a distinct one: the
        // duplicate collapses, leaving exactly two citations.
        let store = InMemoryStore::new();
        let long = format!("hello world{}", "x".repeat(500));
        let candidates = vec![
            candidate("c1", &long, 0.9),
            candidate("c2", &long, 0.8),
            candidate("c3", "another snippet", 0.7),
        ];

        let options = ComposeOptions {
            max_snippets: 5,
            max_chars_per_snippet: 120,
            dedup: true,
        };
        let composed = compose_cited_context(&store, &candidates, &options).await;

        assert_eq!(composed.citations.len(), 2);
        assert!(composed.context_text.contains("[#1"));
        assert!(composed.context_text.contains("[#2"));
        assert!(!composed.context_text.contains("[#3"));
    }

    #[tokio::test]
    async fn test_citation_label_correspondence() {
        let store = InMemoryStore::new();
        let candidates: Vec<Candidate> = (0..4)
            .map(|i| candidate(&format!("c{}", i), &format!("snippet body {}", i), 0.5))
            .collect();

        let composed =
            compose_cited_context(&store, &candidates, &ComposeOptions::default()).await;

        let label_count = composed.context_text.matches("[#").count();
        assert_eq!(label_count, composed.citations.len());
        for (i, citation) in composed.citations.iter().enumerate() {
            assert_eq!(citation.idx, i + 1);
            assert!(composed.context_text.contains(&format!("[#{} ", citation.idx)));
        }
    }

    #[tokio::test]
    async fn test_bounds_respected() {
        let store = InMemoryStore::new();
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("c{}", i), &format!("{} {}", i, "y".repeat(900)), 0.5))
            .collect();

        let options = ComposeOptions {
            max_snippets: 3,
            max_chars_per_snippet: 100,
            dedup: true,
        };
        let composed = compose_cited_context(&store, &candidates, &options).await;

        assert!(composed.citations.len() <= 3);
        for block in composed.context_text.split("\n\n") {
            let body = block.lines().nth(1).unwrap_or("");
            assert!(body.chars().count() <= 100);
        }
    }

    #[tokio::test]
    async fn test_options_clamped() {
        let store = InMemoryStore::new();
        let candidates = vec![candidate("c1", &"z".repeat(2000), 0.5)];

        // Out-of-range options are clamped, not rejected
        let options = ComposeOptions {
            max_snippets: 0,
            max_chars_per_snippet: 10_000,
            dedup: true,
        };
        let composed = compose_cited_context(&store, &candidates, &options).await;

        assert_eq!(composed.citations.len(), 1);
        let body = composed.context_text.lines().nth(1).unwrap();
        assert_eq!(body.chars().count(), 800);
    }

    #[tokio::test]
    async fn test_metadata_annotates_label() {
        let store = InMemoryStore::new();
        store.insert(ChunkMetadata {
            id: "c1".to_string(),
            source: "wechat".to_string(),
            title: Some("Weekend plans".to_string()),
        });
        let candidates = vec![
            candidate("c1", "we should go hiking on saturday", 0.912),
            candidate("c2", "an orphaned chunk with no metadata", 0.5),
        ];

        let composed =
            compose_cited_context(&store, &candidates, &ComposeOptions::default()).await;

        assert!(composed
            .context_text
            .contains("[#1 score=0.912 src=wechat title=Weekend plans]"));
        assert!(composed.context_text.contains("src=unknown"));
        assert_eq!(composed.citations[0].source.as_deref(), Some("wechat"));
        assert_eq!(composed.citations[1].source, None);
    }

    #[tokio::test]
    async fn test_dedup_disabled_keeps_duplicates() {
        let store = InMemoryStore::new();
        let candidates = vec![
            candidate("c1", "same text", 0.9),
            candidate("c2", "same   text", 0.8),
        ];

        let options = ComposeOptions {
            dedup: false,
            ..Default::default()
        };
        let composed = compose_cited_context(&store, &candidates, &options).await;
        assert_eq!(composed.citations.len(), 2);
    }

    #[tokio::test]
    async fn test_whitespace_variant_is_duplicate() {
        let store = InMemoryStore::new();
        let candidates = vec![
            candidate("c1", "  hello   world  ", 0.9),
            candidate("c2", "hello world", 0.8),
        ];

        let composed =
            compose_cited_context(&store, &candidates, &ComposeOptions::default()).await;
        assert_eq!(composed.citations.len(), 1);
        assert_eq!(composed.citations[0].id, "c1");
    }

    #[tokio::test]
    async fn test_determinism() {
        let store = InMemoryStore::new();
        let candidates = vec![
            candidate("c1", "alpha", 0.9),
            candidate("c2", "beta", 0.8),
        ];

        let a = compose_cited_context(&store, &candidates, &ComposeOptions::default()).await;
        let b = compose_cited_context(&store, &candidates, &ComposeOptions::default()).await;
        assert_eq!(a, b);
    }
}
