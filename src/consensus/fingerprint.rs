//! Request fingerprinting: a deterministic digest of the semantically
//! relevant request fields.
//!
//! SHA-256 over the normalised tuple `(lower-cased stripped question, sorted
//! model ids, sorted roles, method, temperature rounded to 2dp, chain
//! flags)`. Used as both the cache key and the analytics correlator — it
//! must be stable across requests that are semantically identical and must
//! change the instant any one normalised field changes.

use sha2::{Digest, Sha256};

use super::types::ConsensusRequest;

/// Compute the deterministic fingerprint for `request`.
pub fn compute(request: &ConsensusRequest) -> String {
    let question = request.question.trim().to_lowercase();

    let mut model_ids = request.selected_model_ids.clone();
    model_ids.sort();

    let mut roles = request.roles.clone();
    roles.sort();

    let temperature = (f64::from(request.temperature) * 100.0).round() / 100.0;

    let payload = format!(
        "q={question}\nm={models}\nr={roles}\nmethod={method:?}\nreasoning={reasoning:?}\ntemp={temperature:.2}\ncot={cot}\nchain_depth={chain_depth}",
        question = question,
        models = model_ids.join(","),
        roles = roles.join(","),
        method = request.method,
        reasoning = request.reasoning_method,
        cot = request.enable_chain_of_thought,
        chain_depth = request.chain_depth,
    );

    let digest = Sha256::digest(payload.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::{ConsensusMethod, ReasoningMethod};

    fn base_request() -> ConsensusRequest {
        ConsensusRequest {
            question: "  What is 2+2?  ".to_string(),
            roles: vec!["mathematician".to_string(), "skeptic".to_string()],
            selected_model_ids: vec!["m2".to_string(), "m1".to_string()],
            method: ConsensusMethod::DirectConsensus,
            temperature: 0.7,
            weights: None,
            chain_depth: 2,
            enable_chain_of_thought: false,
            enable_caching: true,
            reasoning_method: ReasoningMethod::ChainOfThought,
            max_models: 5,
        }
    }

    #[test]
    fn identical_requests_fingerprint_identically() {
        let a = base_request();
        let mut b = base_request();
        // Different ordering and casing of the same logical request.
        b.question = "WHAT IS 2+2?".to_string();
        b.selected_model_ids = vec!["m1".to_string(), "m2".to_string()];
        b.roles = vec!["skeptic".to_string(), "mathematician".to_string()];
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn single_field_change_flips_fingerprint() {
        let a = base_request();
        let mut b = base_request();
        b.temperature = 0.71;
        assert_ne!(compute(&a), compute(&b));

        let mut c = base_request();
        c.chain_depth = 3;
        assert_ne!(compute(&a), compute(&c));

        let mut d = base_request();
        d.method = ConsensusMethod::Chain;
        assert_ne!(compute(&a), compute(&d));
    }

    #[test]
    fn temperature_rounding_is_stable() {
        let mut a = base_request();
        let mut b = base_request();
        a.temperature = 0.701;
        b.temperature = 0.704;
        assert_eq!(compute(&a), compute(&b));
    }
}
