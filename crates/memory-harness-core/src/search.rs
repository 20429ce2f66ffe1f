//! Hybrid retrieval: vector similarity fused with lexical relevance.
//!
//! The search algorithm operates entirely through the [`MemoryStore`]
//! trait, with no database or configuration dependencies. The calling
//! application embeds the query and passes the store implementation.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. `candidates = max(1, floor(max_results × candidate_multiplier))`.
//! 2. Concurrently fetch up to `candidates` vector hits (skipped when the
//!    query vector is all zeros) and `candidates` keyword hits (failures
//!    there count as no hits).
//! 3. Merge by chunk id; a chunk missing from one list scores 0 there.
//! 4. `score = vector_weight × vector_score + text_weight × text_score`.
//! 5. Sort by score (desc), drop results below `min_score`, truncate to
//!    `max_results`. Equal scores keep the merge order; nothing else is
//!    promised about ties.

use std::collections::HashMap;

use anyhow::Result;

use crate::embedding::is_zero_vector;
use crate::models::SearchResult;
use crate::store::{ChunkHit, MemoryStore};

/// Maximum characters of chunk text rendered as a result snippet.
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Fusion weights and candidate pool sizing, decoupled from app config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridParams {
    pub vector_weight: f64,
    pub text_weight: f64,
    /// Candidates fetched per signal, as a multiple of `max_results`.
    pub candidate_multiplier: f64,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            text_weight: 0.3,
            candidate_multiplier: 4.0,
        }
    }
}

/// Number of candidates each signal fetches for a query.
pub fn candidate_count(max_results: usize, multiplier: f64) -> usize {
    ((max_results as f64 * multiplier).floor() as usize).max(1)
}

/// Run a hybrid search against a [`MemoryStore`] backend.
///
/// # Errors
///
/// Vector ranking failures propagate. Keyword ranking failures are
/// swallowed and treated as an empty candidate list.
pub async fn hybrid_search<S: MemoryStore + ?Sized>(
    store: &S,
    query: &str,
    query_vec: &[f32],
    params: &HybridParams,
    max_results: usize,
    min_score: f64,
) -> Result<Vec<SearchResult>> {
    let candidates = candidate_count(max_results, params.candidate_multiplier);

    let vector = async {
        if is_zero_vector(query_vec) {
            Ok(Vec::new())
        } else {
            store.vector_search(query_vec, candidates).await
        }
    };
    let keyword = async {
        store
            .keyword_search(query, candidates)
            .await
            .unwrap_or_default()
    };
    let (vector_hits, keyword_hits) = futures::join!(vector, keyword);

    let mut merged = merge_hybrid_results(vector_hits?, keyword_hits, params);
    merged.retain(|r| r.score >= min_score);
    merged.truncate(max_results);
    Ok(merged)
}

struct Fused {
    hit: ChunkHit,
    vector_score: f64,
    text_score: f64,
}

/// Merge vector and keyword hits into weighted, sorted results.
///
/// Every vector hit seeds an entry with `text_score = 0`; keyword hits
/// update the matching entry or seed a new one with `vector_score = 0`.
pub fn merge_hybrid_results(
    vector: Vec<ChunkHit>,
    keyword: Vec<ChunkHit>,
    params: &HybridParams,
) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Fused> = HashMap::new();

    for hit in vector {
        if !by_id.contains_key(&hit.id) {
            order.push(hit.id.clone());
        }
        let vector_score = hit.score;
        by_id.insert(
            hit.id.clone(),
            Fused {
                hit,
                vector_score,
                text_score: 0.0,
            },
        );
    }

    for hit in keyword {
        match by_id.get_mut(&hit.id) {
            Some(existing) => existing.text_score = hit.score,
            None => {
                order.push(hit.id.clone());
                let text_score = hit.score;
                by_id.insert(
                    hit.id.clone(),
                    Fused {
                        hit,
                        vector_score: 0.0,
                        text_score,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|f| {
            let score = params.vector_weight * f.vector_score + params.text_weight * f.text_score;
            SearchResult {
                citation: citation(&f.hit.path, f.hit.start_line, f.hit.end_line),
                snippet: snippet(&f.hit.text),
                path: f.hit.path,
                start_line: f.hit.start_line,
                end_line: f.hit.end_line,
                score,
                source: f.hit.source,
            }
        })
        .collect();

    // Stable sort: equal scores keep merge order.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

/// Human-readable locator: `path#Lstart-Lend`.
pub fn citation(path: &str, start_line: i64, end_line: i64) -> String {
    format!("{}#L{}-L{}", path, start_line, end_line)
}

/// Chunk text cut to [`SNIPPET_MAX_CHARS`] characters.
pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_MAX_CHARS).collect()
}

/// Split a natural-language query into lowercase word terms.
///
/// Punctuation separates words and is otherwise dropped, so the result is
/// always safe to hand to a lexical query language. Duplicates are removed,
/// first occurrence wins.
pub fn lexical_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        let lower = word.to_lowercase();
        if !terms.contains(&lower) {
            terms.push(lower);
        }
    }
    terms
}

/// Map an unbounded non-negative relevance into `[0, 1)`.
pub fn squash_relevance(relevance: f64) -> f64 {
    let r = relevance.max(0.0);
    r / (1.0 + r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkRecord, FileRecord};
    use crate::store::memory::InMemoryStore;

    fn hit(id: &str, score: f64) -> ChunkHit {
        ChunkHit {
            id: id.to_string(),
            path: "MEMORY.md".to_string(),
            start_line: 1,
            end_line: 2,
            text: format!("text of {}", id),
            source: "memory".to_string(),
            score,
        }
    }

    #[test]
    fn test_vector_only_fusion() {
        let results = merge_hybrid_results(vec![hit("a", 0.9)], vec![], &HybridParams::default());
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.63).abs() < 1e-9);
    }

    #[test]
    fn test_both_signals_fusion() {
        let results = merge_hybrid_results(
            vec![hit("a", 0.8)],
            vec![hit("a", 0.5)],
            &HybridParams::default(),
        );
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.71).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_only_fusion() {
        let results = merge_hybrid_results(vec![], vec![hit("k", 1.0)], &HybridParams::default());
        assert!((results[0].score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_results_sorted_descending() {
        let results = merge_hybrid_results(
            vec![hit("a", 0.2), hit("b", 0.9)],
            vec![hit("c", 0.9), hit("a", 1.0)],
            &HybridParams::default(),
        );
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_citation_and_snippet() {
        let long = ChunkHit {
            text: "y".repeat(900),
            ..hit("z", 1.0)
        };
        let results = merge_hybrid_results(vec![long], vec![], &HybridParams::default());
        assert_eq!(results[0].citation, "MEMORY.md#L1-L2");
        assert_eq!(results[0].snippet.chars().count(), SNIPPET_MAX_CHARS);
    }

    #[test]
    fn test_candidate_count() {
        assert_eq!(candidate_count(6, 4.0), 24);
        assert_eq!(candidate_count(0, 4.0), 1);
        assert_eq!(candidate_count(3, 0.5), 1);
    }

    #[test]
    fn test_lexical_terms() {
        assert_eq!(
            lexical_terms("What did I buy? Milk, milk & \"eggs\""),
            vec!["what", "did", "i", "buy", "milk", "eggs"]
        );
        assert!(lexical_terms("  ?!  ").is_empty());
    }

    #[test]
    fn test_squash_relevance_bounds() {
        assert_eq!(squash_relevance(0.0), 0.0);
        assert_eq!(squash_relevance(-3.0), 0.0);
        assert!((squash_relevance(1.0) - 0.5).abs() < 1e-9);
        assert!(squash_relevance(1e9) < 1.0);
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let file = FileRecord {
            path: "MEMORY.md".to_string(),
            hash: "h".to_string(),
            mtime: 0,
            size: 0,
        };
        let mk = |line: i64, text: &str, v: Vec<f32>| ChunkRecord {
            id: format!("MEMORY.md:{}-{}", line, line),
            path: "MEMORY.md".to_string(),
            source: "memory".to_string(),
            start_line: line,
            end_line: line,
            hash: crate::chunk::hash_text(text),
            model: "m".to_string(),
            text: text.to_string(),
            embedding: Some(v),
            updated_at: 0,
        };
        store
            .replace_file(
                &file,
                &[
                    mk(1, "Buy milk", vec![1.0, 0.0]),
                    mk(2, "Walk the dog", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let store = seeded_store().await;
        let results = hybrid_search(&store, "dog", &[1.0, 0.0], &HybridParams::default(), 6, 0.35)
            .await
            .unwrap();
        // "Buy milk" scores 0.7 on vectors alone; "Walk the dog" only has a
        // keyword score, which is capped below 0.3.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].citation, "MEMORY.md#L1-L1");
    }

    #[tokio::test]
    async fn test_zero_query_vector_skips_vector_search() {
        let store = seeded_store().await;
        let results = hybrid_search(&store, "milk", &[0.0, 0.0], &HybridParams::default(), 6, 0.0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score < 0.3);
    }

    #[tokio::test]
    async fn test_max_results_truncates() {
        let store = seeded_store().await;
        let results = hybrid_search(
            &store,
            "nothing matches",
            &[0.7, 0.7],
            &HybridParams::default(),
            1,
            0.0,
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
    }
}
