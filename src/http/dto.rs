//! Wire-format request/response bodies for the HTTP surface.
//!
//! Kept separate from `consensus::types` on purpose: the wire shape carries
//! JSON defaults, range validation, and an "unknown fields rejected"
//! contract that the internal `ConsensusRequest` has no business knowing
//! about.

use serde::{Deserialize, Serialize};

use crate::core::error::ErrorKind;
use crate::consensus::types::{ConsensusMethod, ConsensusRequest, ReasoningMethod};
use crate::models::ModelRegistry;

const MAX_QUESTION_LEN: usize = 5000;
const MAX_BATCH_SIZE: usize = 50;

/// `POST /consensus` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusRequestBody {
    pub question: String,
    #[serde(default)]
    pub method: Option<ConsensusMethod>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub max_models: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
    #[serde(default)]
    pub enable_caching: Option<bool>,
    #[serde(default)]
    pub enable_chain_of_thought: Option<bool>,
    #[serde(default)]
    pub reasoning_method: Option<ReasoningMethod>,
    #[serde(default)]
    pub chain_depth: Option<u8>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// `POST /consensus/batch` request body: up to 50 entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRequestBody {
    pub queries: Vec<ConsensusRequestBody>,
}

/// `POST /feedback` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackBody {
    pub consensus_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `GET /analytics/performance` query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
}

fn default_timeframe() -> String {
    "24h".to_string()
}

fn default_metric_type() -> String {
    "summary".to_string()
}

/// Validate and resolve a wire-format body into the engine's canonical
/// request type, falling back to registry defaults for an absent `models`
/// list.
pub async fn to_consensus_request(
    body: ConsensusRequestBody,
    registry: &ModelRegistry,
) -> Result<ConsensusRequest, ErrorKind> {
    let question = body.question;
    if question.is_empty() || question.chars().count() > MAX_QUESTION_LEN {
        return Err(ErrorKind::InvalidRequest(format!(
            "question must be 1..{MAX_QUESTION_LEN} characters"
        )));
    }

    let max_models = body.max_models.unwrap_or(5);
    if !(2..=10).contains(&max_models) {
        return Err(ErrorKind::InvalidRequest("max_models must be in 2..10".to_string()));
    }

    let temperature = body.temperature.unwrap_or(0.7);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ErrorKind::InvalidRequest("temperature must be in 0..2".to_string()));
    }

    let chain_depth = body.chain_depth.unwrap_or(2);
    if chain_depth > 5 {
        return Err(ErrorKind::InvalidRequest("chain_depth must be in 0..5".to_string()));
    }

    let selected_model_ids = match body.models {
        Some(ids) if !ids.is_empty() => ids,
        _ => registry.default_model_ids().await,
    };
    if selected_model_ids.len() < 2 {
        return Err(ErrorKind::InvalidRequest(
            "at least 2 models are required to reach consensus".to_string(),
        ));
    }
    if selected_model_ids.len() > max_models {
        return Err(ErrorKind::InvalidRequest(format!(
            "selected {} models exceeds max_models={max_models}",
            selected_model_ids.len()
        )));
    }
    let unknown = registry.validate_selection(&selected_model_ids).await;
    if !unknown.is_empty() {
        return Err(ErrorKind::InvalidRequest(format!(
            "unknown or disabled model ids: {}",
            unknown.join(", ")
        )));
    }

    if let Some(weights) = &body.weights {
        if weights.len() != selected_model_ids.len() {
            return Err(ErrorKind::InvalidRequest(
                "weights length must equal the number of selected models".to_string(),
            ));
        }
        if weights.iter().any(|w| *w <= 0.0) {
            return Err(ErrorKind::InvalidRequest("weights must all be > 0".to_string()));
        }
    }

    Ok(ConsensusRequest {
        question,
        roles: body.roles.unwrap_or_default(),
        selected_model_ids,
        method: body.method.unwrap_or_default(),
        temperature,
        weights: body.weights,
        chain_depth,
        enable_chain_of_thought: body.enable_chain_of_thought.unwrap_or(false),
        enable_caching: body.enable_caching.unwrap_or(true),
        reasoning_method: body.reasoning_method.unwrap_or_default(),
        max_models,
    })
}

pub fn validate_batch_size(body: &BatchRequestBody) -> Result<(), ErrorKind> {
    if body.queries.is_empty() || body.queries.len() > MAX_BATCH_SIZE {
        return Err(ErrorKind::InvalidRequest(format!(
            "batch must contain 1..{MAX_BATCH_SIZE} queries"
        )));
    }
    Ok(())
}

/// `GET /models` response entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub display_name: String,
    pub provider_kind: crate::models::ProviderKind,
    pub enabled: bool,
    pub max_tokens: u32,
    pub cost_per_1k_tokens: f64,
}

/// `POST /consensus/batch` response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntry>,
    pub summary: BatchSummary,
}

/// One entry in a batch response — either a successful result or an error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Ok(crate::consensus::types::ConsensusResult),
    Err(ErrorEnvelope),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The uniform non-2xx error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorEnvelope {
    pub fn from_kind(kind: &ErrorKind) -> Self {
        let details = match kind {
            ErrorKind::RateLimited { retry_after } => serde_json::json!({ "retry_after_seconds": retry_after }),
            ErrorKind::ConsensusFailed { min_success, succeeded } => {
                serde_json::json!({ "min_success": min_success, "succeeded": succeeded })
            }
            _ => serde_json::json!({}),
        };

        Self {
            error_code: kind.code().to_string(),
            message: kind.to_string(),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}
