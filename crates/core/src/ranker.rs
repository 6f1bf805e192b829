use crate::models::{RetrievalResult, VectorMatch};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub semantic: f64,
    pub keyword: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

impl HybridWeights {
    /// Rescales so the weights sum to one; non-positive input falls back
    /// to the defaults.
    pub fn normalized(self) -> Self {
        let semantic = self.semantic.max(0.0);
        let keyword = self.keyword.max(0.0);
        let total = semantic + keyword;
        if !total.is_finite() || total <= 0.0 {
            return Self::default();
        }
        Self {
            semantic: semantic / total,
            keyword: keyword / total,
        }
    }

    pub fn combine(self, semantic_score: f64, keyword_score: f64) -> f64 {
        self.semantic * semantic_score + self.keyword * keyword_score
    }
}

pub fn semantic_score(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

fn terms(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Share of distinct query terms that also occur in the document.
pub fn keyword_score(query: &str, document: &str) -> f64 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let document_terms = terms(document);
    let shared = query_terms.intersection(&document_terms).count();
    shared as f64 / query_terms.len() as f64
}

fn by_score_desc(left: f64, right: f64, left_id: &str, right_id: &str) -> Ordering {
    right
        .total_cmp(&left)
        .then_with(|| left_id.cmp(right_id))
}

/// Scores candidates, sorts by hybrid score and keeps the best `top_k * 2`
/// for the optional rerank pass. Duplicate chunk ids keep the closest match.
pub fn rank_candidates(
    query: &str,
    candidates: Vec<VectorMatch>,
    top_k: usize,
    weights: HybridWeights,
) -> Vec<RetrievalResult> {
    let weights = weights.normalized();
    let mut seen = HashSet::new();
    let mut ordered = candidates;
    ordered.sort_by(|left, right| left.distance.total_cmp(&right.distance));

    let mut results: Vec<RetrievalResult> = ordered
        .into_iter()
        .filter(|candidate| seen.insert(candidate.chunk.id.clone()))
        .map(|candidate| {
            let semantic = semantic_score(candidate.distance);
            let keyword = keyword_score(query, &candidate.chunk.text);
            RetrievalResult {
                chunk_id: candidate.chunk.id.clone(),
                metadata: candidate.chunk.metadata(),
                text: candidate.chunk.text,
                semantic_score: semantic,
                keyword_score: keyword,
                hybrid_score: weights.combine(semantic, keyword),
                rerank_score: None,
            }
        })
        .collect();

    results.sort_by(|left, right| {
        by_score_desc(
            left.hybrid_score,
            right.hybrid_score,
            &left.chunk_id,
            &right.chunk_id,
        )
    });
    results.truncate(top_k.saturating_mul(2));
    results
}

/// Attaches reranker scores (same order as `results`) and re-sorts by them.
pub fn apply_rerank(results: &mut [RetrievalResult], scores: &[f64]) {
    for (result, score) in results.iter_mut().zip(scores) {
        result.rerank_score = Some(*score);
    }
    results.sort_by(|left, right| {
        by_score_desc(
            left.final_score(),
            right.final_score(),
            &left.chunk_id,
            &right.chunk_id,
        )
    });
}
