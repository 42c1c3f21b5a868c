//! Wire and domain types for the consensus engine.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::ErrorKind;

/// Overall aggregation strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    ExpertRoles,
    DirectConsensus,
    Debate,
    Chain,
}

impl Default for ConsensusMethod {
    fn default() -> Self {
        ConsensusMethod::ExpertRoles
    }
}

/// Which chain-of-thought scaffold wraps the initial prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMethod {
    ChainOfThought,
    SocraticMethod,
    MultiPerspective,
}

impl Default for ReasoningMethod {
    fn default() -> Self {
        ReasoningMethod::ChainOfThought
    }
}

/// Validated, normalised input to the consensus engine.
#[derive(Debug, Clone)]
pub struct ConsensusRequest {
    pub question: String,
    pub roles: Vec<String>,
    pub selected_model_ids: Vec<String>,
    pub method: ConsensusMethod,
    pub temperature: f32,
    pub weights: Option<Vec<f64>>,
    pub chain_depth: u8,
    pub enable_chain_of_thought: bool,
    pub enable_caching: bool,
    pub reasoning_method: ReasoningMethod,
    pub max_models: usize,
}

/// One model's contribution to a `ConsensusResult`, in `selected_model_ids` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReply {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    pub token_estimate: bool,
    pub raw_confidence: f64,
    pub weight: f64,
    /// Individual agreement `a_i` — weighted mean similarity to the rest
    /// of the successful set. `0.0` for failed replies.
    pub pairwise_score: f64,
}

/// One round of the critique-and-revise loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRound {
    pub round: u8,
    pub critic_id: String,
    pub critique: String,
    pub reviser_id: String,
    pub revised_text: String,
    pub new_score: f64,
}

/// The artifact returned to callers and written to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_text: String,
    pub consensus_score: f64,
    pub per_model: Vec<ModelReply>,
    pub method_used: ConsensusMethod,
    pub models_used: Vec<String>,
    pub cache_hit: bool,
    pub total_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_trace: Option<Vec<ChainRound>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub quality_metrics: HashMap<String, f64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub adaptive_weights: HashMap<String, f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// One row per completed query, persisted for the analytics endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalyticsRecord {
    pub query_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub method: ConsensusMethod,
    pub consensus_score: f64,
    pub total_latency_ms: u64,
    pub success: bool,
    pub per_model_latency_ms: HashMap<String, u64>,
    pub cost_estimate: f64,
    /// Carried from `ConsensusResult.cache_hit` so the summary query can
    /// report a cache-hit rate without re-joining against the cache.
    pub cache_hit: bool,
}

/// Convert an [`ErrorKind`] to the per-model `error_kind` string used on a
/// `ModelReply`; never the HTTP envelope (that translation happens only in
/// the router layer).
pub fn error_kind_code(kind: &ErrorKind) -> String {
    kind.code().to_string()
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
