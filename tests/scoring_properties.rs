//! Property-based tests for the weighted-pairwise agreement scoring
//! invariants.

use proptest::prelude::*;

use consensus_gateway::consensus::scoring::{agreement_score, individual_agreements, ScoredReply};
use consensus_gateway::embedding::embed;

fn arbitrary_text() -> impl Strategy<Value = String> {
    "[a-z]{1,12}( [a-z]{1,12}){0,6}"
}

fn arbitrary_weight() -> impl Strategy<Value = f64> {
    0.01f64..100.0
}

proptest! {
    /// `S ∈ [0,1]` for any non-empty set of weighted embeddings.
    #[test]
    fn agreement_score_stays_in_unit_interval(
        texts in prop::collection::vec(arbitrary_text(), 1..6),
        weights in prop::collection::vec(arbitrary_weight(), 1..6),
    ) {
        let n = texts.len().min(weights.len());
        let embeddings: Vec<Vec<f32>> = texts[..n].iter().map(|t| embed(t)).collect();
        let replies: Vec<ScoredReply> = embeddings
            .iter()
            .zip(weights[..n].iter())
            .map(|(e, &w)| ScoredReply { embedding: e, weight: w })
            .collect();

        let score = agreement_score(&replies);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    /// Every individual agreement `a_i` is also bounded to `[0,1]`.
    #[test]
    fn individual_agreement_stays_in_unit_interval(
        texts in prop::collection::vec(arbitrary_text(), 1..6),
        weights in prop::collection::vec(arbitrary_weight(), 1..6),
    ) {
        let n = texts.len().min(weights.len());
        let embeddings: Vec<Vec<f32>> = texts[..n].iter().map(|t| embed(t)).collect();
        let replies: Vec<ScoredReply> = embeddings
            .iter()
            .zip(weights[..n].iter())
            .map(|(e, &w)| ScoredReply { embedding: e, weight: w })
            .collect();

        for a in individual_agreements(&replies) {
            prop_assert!((0.0..=1.0).contains(&a));
        }
    }

    /// Identical text at every position always scores agreement 1.0,
    /// regardless of how the weights are distributed.
    #[test]
    fn identical_answers_always_agree_fully(
        weights in prop::collection::vec(arbitrary_weight(), 2..6),
        text in arbitrary_text(),
    ) {
        let embedding = embed(&text);
        let replies: Vec<ScoredReply> = weights
            .iter()
            .map(|&w| ScoredReply { embedding: &embedding, weight: w })
            .collect();

        let score = agreement_score(&replies);
        prop_assert!((score - 1.0).abs() < 1e-6);
    }
}
