//! Agreement scoring between a set of successful model replies.
//!
//! Implements the weighted-pairwise formula: weights are accumulated as a
//! weighted pairwise sum, not as plain counts, so a model with a larger
//! weight contributes proportionally more to the overall score.

use crate::embedding::cosine_similarity;

/// One successful reply's contribution to scoring: its embedding and weight.
pub struct ScoredReply<'a> {
    pub embedding: &'a [f32],
    pub weight: f64,
}

/// Pairwise similarity clipped to `[0,1]`.
fn clipped_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine_similarity(a, b).clamp(0.0, 1.0) as f64
}

/// Overall agreement score `S` over the successful reply set.
///
/// `S = Σ_{i<j} w_i·w_j·s_{ij} / Σ_{i<j} w_i·w_j`, defined as `1.0` when only
/// one successful reply remains.
pub fn agreement_score(replies: &[ScoredReply]) -> f64 {
    if replies.len() <= 1 {
        return 1.0;
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..replies.len() {
        for j in (i + 1)..replies.len() {
            let w = replies[i].weight * replies[j].weight;
            let s = clipped_similarity(replies[i].embedding, replies[j].embedding);
            numerator += w * s;
            denominator += w;
        }
    }

    if denominator <= 0.0 {
        1.0
    } else {
        (numerator / denominator).clamp(0.0, 1.0)
    }
}

/// Individual agreement `a_i` for model `i`: the weighted mean similarity of
/// `i`'s answer to every other successful answer.
///
/// Returns `1.0` when `i` is the only successful reply (nothing to disagree with).
pub fn individual_agreements(replies: &[ScoredReply]) -> Vec<f64> {
    let n = replies.len();
    if n <= 1 {
        return vec![1.0; n];
    }

    (0..n)
        .map(|i| {
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let w = replies[j].weight;
                let s = clipped_similarity(replies[i].embedding, replies[j].embedding);
                numerator += w * s;
                denominator += w;
            }
            if denominator <= 0.0 {
                1.0
            } else {
                numerator / denominator
            }
        })
        .collect()
}

/// Adaptive weight suggestion `w'_i = a_i / Σ_j a_j` (returned but never
/// applied automatically — callers decide whether to persist it).
pub fn adaptive_weights(individual: &[f64]) -> Vec<f64> {
    let total: f64 = individual.iter().sum();
    if total <= 0.0 {
        let n = individual.len().max(1);
        return vec![1.0 / n as f64; individual.len()];
    }
    individual.iter().map(|a| a / total).collect()
}

/// Weighted mean similarity of one external embedding (e.g. a chain-refined
/// candidate) against a full reply set — used to re-score a revised answer
/// without treating it as a member of the set itself.
pub fn external_agreement(candidate: &[f32], replies: &[ScoredReply]) -> f64 {
    if replies.is_empty() {
        return 1.0;
    }
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for reply in replies {
        let w = reply.weight;
        numerator += w * clipped_similarity(candidate, reply.embedding);
        denominator += w;
    }
    if denominator <= 0.0 {
        1.0
    } else {
        numerator / denominator
    }
}

/// Pick the index of the reply with the highest individual agreement;
/// ties go to the lower index (stable selection).
pub fn select_consensus_index(individual: &[f64]) -> usize {
    let mut best = 0;
    for (i, score) in individual.iter().enumerate().skip(1) {
        if *score > individual[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    #[test]
    fn identical_embeddings_score_one() {
        let e = unit(1.0, 0.0);
        let replies = vec![
            ScoredReply { embedding: &e, weight: 1.0 },
            ScoredReply { embedding: &e, weight: 1.0 },
            ScoredReply { embedding: &e, weight: 1.0 },
        ];
        assert!((agreement_score(&replies) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_reply_scores_one() {
        let e = unit(1.0, 0.0);
        let replies = vec![ScoredReply { embedding: &e, weight: 1.0 }];
        assert_eq!(agreement_score(&replies), 1.0);
        assert_eq!(individual_agreements(&replies), vec![1.0]);
    }

    #[test]
    fn orthogonal_embeddings_score_near_zero() {
        let a = unit(1.0, 0.0);
        let b = unit(0.0, 1.0);
        let replies = vec![
            ScoredReply { embedding: &a, weight: 1.0 },
            ScoredReply { embedding: &b, weight: 1.0 },
        ];
        assert!(agreement_score(&replies) < 0.1);
    }

    #[test]
    fn weights_bias_the_score_toward_the_heavier_pair() {
        let a = unit(1.0, 0.0);
        let b = unit(1.0, 0.0);
        let c = unit(0.0, 1.0);
        let replies = vec![
            ScoredReply { embedding: &a, weight: 10.0 },
            ScoredReply { embedding: &b, weight: 10.0 },
            ScoredReply { embedding: &c, weight: 0.01 },
        ];
        assert!(agreement_score(&replies) > 0.9);
    }

    #[test]
    fn adaptive_weights_sum_to_one() {
        let weights = adaptive_weights(&[0.9, 0.5, 0.1]);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn select_consensus_breaks_ties_on_lower_index() {
        assert_eq!(select_consensus_index(&[0.5, 0.9, 0.9]), 1);
        assert_eq!(select_consensus_index(&[0.9, 0.9, 0.5]), 0);
    }
}
