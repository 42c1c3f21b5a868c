//! Consensus engine — the heart of the system.
//!
//! Orchestrates: fingerprint + cache lookup, prompt rendering, parallel
//! provider fan-out with per-call retry, the weighted-pairwise agreement
//! score, consensus-text selection, optional chain-of-thought refinement,
//! and finalisation (cache write-through + fire-and-forget analytics).
//!
//! One struct holds the engine's dependencies behind `Arc`s with a single
//! entry point, and a `CancellationToken` propagates the request-wide
//! deadline into every in-flight adapter call and chain round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::analytics::AnalyticsSink;
use crate::cache::Cache;
use crate::consensus::cancellation::{CancellationReason, CancellationToken};
use crate::consensus::scoring::{self, ScoredReply};
use crate::consensus::types::{
    duration_ms, error_kind_code, ChainRound, ConsensusMethod, ConsensusRequest, ConsensusResult,
    ModelReply, QueryAnalyticsRecord,
};
use crate::consensus::{fingerprint, prompts};
use crate::core::error::ErrorKind;
use crate::embedding;
use crate::models::{ModelDescriptor, ModelRegistry};
use crate::providers::{ProviderCall, ProviderReply, ProviderRegistry};

/// Minimum number of successful replies required for a non-partial result.
const MIN_SUCCESS: usize = 2;
/// Retry budget for a transient per-model failure.
const MAX_RETRIES: u32 = 2;
/// Score delta tolerance used when judging "did the revised answer improve".
const SCORE_EPSILON: f64 = 1e-9;

/// Everything [`ConsensusEngine::run`] needs, assembled once at startup and
/// shared behind `Arc`s — no ambient global singletons.
pub struct EngineDeps {
    pub models: Arc<ModelRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub cache: Arc<dyn Cache>,
    pub analytics: Arc<AnalyticsSink>,
    pub request_timeout: Duration,
    pub max_concurrent_per_request: usize,
    pub low_consensus_threshold: f64,
    pub high_consensus_threshold: f64,
}

/// The consensus engine.
pub struct ConsensusEngine {
    deps: EngineDeps,
}

impl ConsensusEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Run one request end to end. Errors are always one of `InvalidRequest`
    /// (unknown/disabled model id — the router is expected to have already
    /// validated this against `/models`, this is a defensive backstop) or
    /// `ConsensusFailed` (fewer than `MIN_SUCCESS` providers succeeded).
    pub async fn run(&self, request: ConsensusRequest) -> Result<ConsensusResult, ErrorKind> {
        let started = Instant::now();
        let fp = fingerprint::compute(&request);

        if request.enable_caching {
            if let Some(mut cached) = self.deps.cache.get_result(&fp).await {
                cached.cache_hit = true;
                cached.total_latency_ms = duration_ms(started.elapsed());
                self.record_success(&fp, &cached, None);
                return Ok(cached);
            }
        }

        let mut descriptors = Vec::with_capacity(request.selected_model_ids.len());
        for id in &request.selected_model_ids {
            match self.deps.models.get(id).await {
                Some(d) if d.enabled => descriptors.push(d),
                _ => {
                    return Err(ErrorKind::InvalidRequest(format!(
                        "unknown or disabled model id: {id}"
                    )))
                }
            }
        }
        let n = descriptors.len();
        let weights = normalize_weights(request.weights.as_deref(), n);

        let deadline = Instant::now() + self.deps.request_timeout;
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            let remaining = self.deps.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                cancel.cancel(CancellationReason::DeadlineExceeded);
            });
        }

        let mut replies = self.fan_out(&request, &descriptors, deadline, cancel.clone()).await;
        for (i, reply) in replies.iter_mut().enumerate() {
            reply.weight = weights[i];
        }

        let success_count = replies.iter().filter(|r| r.success).count();

        if success_count < MIN_SUCCESS {
            if n == 2 && success_count == 1 {
                let result = self.build_partial_result(&request, &descriptors, replies, started.elapsed());
                if request.enable_caching {
                    self.deps.cache.put_result(&fp, result.clone()).await;
                }
                self.record_success(&fp, &result, Some(&descriptors));
                return Ok(result);
            }

            self.record_failure(&request, &fp, &replies, started.elapsed());
            return Err(ErrorKind::ConsensusFailed {
                min_success: MIN_SUCCESS,
                succeeded: success_count,
            });
        }

        let success_indices: Vec<usize> = (0..n).filter(|&i| replies[i].success).collect();
        let mut embeddings = Vec::with_capacity(success_indices.len());
        for &i in &success_indices {
            let text = replies[i].text.as_ref().expect("success implies text");
            embeddings.push(self.embed_cached(text).await);
        }

        let scored: Vec<ScoredReply<'_>> = success_indices
            .iter()
            .zip(embeddings.iter())
            .map(|(&i, embedding)| ScoredReply {
                embedding,
                weight: weights[i],
            })
            .collect();

        let agreement = scoring::agreement_score(&scored);
        let individual = scoring::individual_agreements(&scored);
        let adaptive = scoring::adaptive_weights(&individual);

        for (k, &i) in success_indices.iter().enumerate() {
            replies[i].pairwise_score = individual[k];
        }

        let best_k = scoring::select_consensus_index(&individual);
        let best_i = success_indices[best_k];
        let mut consensus_text = replies[best_i].text.clone().expect("success implies text");
        let mut consensus_score = agreement;

        let chain_trace = self
            .maybe_run_chain(
                &request,
                &descriptors,
                &scored,
                deadline,
                cancel.clone(),
                &mut consensus_text,
                &mut consensus_score,
            )
            .await;

        let adaptive_weights: HashMap<String, f64> = success_indices
            .iter()
            .zip(adaptive.iter())
            .map(|(&i, &w)| (descriptors[i].id.clone(), w))
            .collect();

        let mut quality_metrics = HashMap::new();
        quality_metrics.insert("success_count".to_string(), success_count as f64);
        quality_metrics.insert("failure_count".to_string(), (n - success_count) as f64);
        quality_metrics.insert("initial_agreement_score".to_string(), agreement);
        quality_metrics.insert(
            "high_consensus_threshold".to_string(),
            self.deps.high_consensus_threshold,
        );

        let result = ConsensusResult {
            consensus_text,
            consensus_score,
            per_model: replies,
            method_used: request.method,
            models_used: descriptors.iter().map(|d| d.id.clone()).collect(),
            cache_hit: false,
            total_latency_ms: duration_ms(started.elapsed()),
            chain_trace,
            quality_metrics,
            adaptive_weights,
            partial: false,
        };

        if request.enable_caching {
            self.deps.cache.put_result(&fp, result.clone()).await;
        }
        self.record_success(&fp, &result, Some(&descriptors));
        Ok(result)
    }

    /// Fan out one `ProviderCall` per model, in parallel, bounded by
    /// `max_concurrent_per_request`, returning replies in the same order as
    /// `descriptors` regardless of completion order.
    async fn fan_out(
        &self,
        request: &ConsensusRequest,
        descriptors: &[ModelDescriptor],
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Vec<ModelReply> {
        let n = descriptors.len();
        let semaphore = Arc::new(Semaphore::new(self.deps.max_concurrent_per_request.max(1)));
        let mut set = JoinSet::new();

        for (i, descriptor) in descriptors.iter().enumerate() {
            let role = prompts::role_for(&request.roles, i, n).map(|s| s.to_string());
            let rendered = prompts::render(
                &request.question,
                role.as_deref(),
                request.enable_chain_of_thought,
                request.reasoning_method,
            );
            let provider = self.deps.providers.get(descriptor.provider_kind);
            let call = ProviderCall {
                model: descriptor.clone(),
                messages: rendered.into_messages(),
                temperature: request.temperature,
                max_tokens: descriptor.max_tokens,
                deadline,
            };
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let reply = call_with_retries(provider, call, cancel).await;
                (i, reply)
            });
        }

        let mut slots: Vec<Option<ProviderReply>> = (0..n).map(|_| None).collect();
        let overall_wait = deadline.saturating_duration_since(Instant::now()) + Duration::from_millis(100);

        let drain = async {
            while let Some(res) = set.join_next().await {
                if let Ok((i, reply)) = res {
                    slots[i] = Some(reply);
                }
            }
        };

        if tokio::time::timeout(overall_wait, drain).await.is_err() {
            cancel.cancel(CancellationReason::DeadlineExceeded);
            set.abort_all();
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, maybe)| match maybe {
                Some(reply) => model_reply_from_provider(reply),
                None => model_reply_canceled(descriptors[i].id.clone()),
            })
            .collect()
    }

    /// Optional critique-and-revise loop. Returns `Some(rounds)` iff at
    /// least one round ran.
    #[allow(clippy::too_many_arguments)]
    async fn maybe_run_chain(
        &self,
        request: &ConsensusRequest,
        descriptors: &[ModelDescriptor],
        scored: &[ScoredReply<'_>],
        deadline: Instant,
        cancel: CancellationToken,
        consensus_text: &mut String,
        consensus_score: &mut f64,
    ) -> Option<Vec<ChainRound>> {
        let n = descriptors.len();
        let rounds = request.chain_depth.min(5) as usize;
        if rounds == 0 {
            return None;
        }

        let all_identical = *consensus_score >= 1.0 - SCORE_EPSILON;
        let should_chain = !all_identical
            && (request.method == ConsensusMethod::Chain || *consensus_score < self.deps.low_consensus_threshold);
        if !should_chain {
            return None;
        }

        let mut trace = Vec::new();

        for k in 0..rounds {
            if cancel.is_cancelled() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let rounds_left = (rounds - k) as u32;
            let round_budget = remaining / (rounds_left + 1);
            let round_deadline = Instant::now() + round_budget;

            let critic = &descriptors[(k + 1) % n];
            let reviser = &descriptors[(k + 2) % n];

            let critique_prompt = prompts::critique_prompt(&request.question, consensus_text);
            let critic_call = ProviderCall {
                model: critic.clone(),
                messages: critique_prompt.into_messages(),
                temperature: request.temperature,
                max_tokens: critic.max_tokens,
                deadline: round_deadline,
            };
            let critic_reply = self.deps.providers.get(critic.provider_kind).invoke(critic_call).await;
            let Ok(critique_text) = critic_reply.outcome else {
                break;
            };

            let revise_prompt = prompts::revise_prompt(&request.question, consensus_text, &critique_text);
            let reviser_call = ProviderCall {
                model: reviser.clone(),
                messages: revise_prompt.into_messages(),
                temperature: request.temperature,
                max_tokens: reviser.max_tokens,
                deadline: round_deadline,
            };
            let reviser_reply = self.deps.providers.get(reviser.provider_kind).invoke(reviser_call).await;
            let Ok(revised_text) = reviser_reply.outcome else {
                break;
            };

            let revised_embedding = self.embed_cached(&revised_text).await;
            let new_score = scoring::external_agreement(&revised_embedding, scored);

            trace.push(ChainRound {
                round: (k + 1) as u8,
                critic_id: critic.id.clone(),
                critique: critique_text,
                reviser_id: reviser.id.clone(),
                revised_text: revised_text.clone(),
                new_score,
            });

            if new_score + SCORE_EPSILON >= *consensus_score {
                *consensus_text = revised_text;
                *consensus_score = new_score;
            }
        }

        if trace.is_empty() {
            None
        } else {
            Some(trace)
        }
    }

    async fn embed_cached(&self, text: &str) -> Vec<f32> {
        if let Some(cached) = self.deps.cache.get_embedding(text).await {
            return cached;
        }
        let vector = embedding::embed(text);
        self.deps.cache.put_embedding(text, vector.clone()).await;
        vector
    }

    fn build_partial_result(
        &self,
        request: &ConsensusRequest,
        descriptors: &[ModelDescriptor],
        replies: Vec<ModelReply>,
        elapsed: Duration,
    ) -> ConsensusResult {
        let survivor_text = replies
            .iter()
            .find(|r| r.success)
            .and_then(|r| r.text.clone())
            .unwrap_or_default();

        let mut quality_metrics = HashMap::new();
        quality_metrics.insert("success_count".to_string(), 1.0);
        quality_metrics.insert("failure_count".to_string(), 1.0);

        ConsensusResult {
            consensus_text: survivor_text,
            consensus_score: 0.0,
            per_model: replies,
            method_used: request.method,
            models_used: descriptors.iter().map(|d| d.id.clone()).collect(),
            cache_hit: false,
            total_latency_ms: duration_ms(elapsed),
            chain_trace: None,
            quality_metrics,
            adaptive_weights: HashMap::new(),
            partial: true,
        }
    }

    fn record_success(&self, fp: &str, result: &ConsensusResult, descriptors: Option<&[ModelDescriptor]>) {
        let mut per_model_latency_ms = HashMap::new();
        let mut cost_estimate = 0.0;
        for reply in &result.per_model {
            per_model_latency_ms.insert(reply.model_id.clone(), reply.latency_ms);
            if let (Some(descriptors), Some(tokens)) = (descriptors, reply.completion_tokens) {
                if let Some(descriptor) = descriptors.iter().find(|d| d.id == reply.model_id) {
                    cost_estimate += (tokens as f64 / 1000.0) * descriptor.cost_per_1k_tokens;
                }
            }
        }

        self.deps.analytics.record(QueryAnalyticsRecord {
            query_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            fingerprint: fp.to_string(),
            method: result.method_used,
            consensus_score: result.consensus_score,
            total_latency_ms: result.total_latency_ms,
            success: true,
            per_model_latency_ms,
            cost_estimate,
            cache_hit: result.cache_hit,
        });
    }

    fn record_failure(&self, request: &ConsensusRequest, fp: &str, replies: &[ModelReply], elapsed: Duration) {
        let per_model_latency_ms = replies
            .iter()
            .map(|r| (r.model_id.clone(), r.latency_ms))
            .collect();

        self.deps.analytics.record(QueryAnalyticsRecord {
            query_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            fingerprint: fp.to_string(),
            method: request.method,
            consensus_score: 0.0,
            total_latency_ms: duration_ms(elapsed),
            success: false,
            per_model_latency_ms,
            cost_estimate: 0.0,
            cache_hit: false,
        });
    }
}

/// Call one adapter with the engine's retry policy: up to `MAX_RETRIES`
/// extra attempts on a transient failure, exponential backoff (100ms ×
/// 2^attempt, jittered ±25%), bounded by the shared deadline and
/// cancellation.
async fn call_with_retries(
    provider: Arc<dyn crate::providers::ProviderAdapter>,
    call: ProviderCall,
    cancel: CancellationToken,
) -> ProviderReply {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return ProviderReply {
                model_id: call.model.id.clone(),
                outcome: Err(ErrorKind::Canceled),
                latency: Duration::ZERO,
                prompt_tokens: None,
                completion_tokens: None,
            };
        }

        let reply = provider.invoke(call.clone()).await;
        if reply.is_success() {
            return reply;
        }

        let transient = matches!(&reply.outcome, Err(e) if e.is_transient());
        attempt += 1;

        let remaining = call.remaining();
        if !transient || attempt > MAX_RETRIES || remaining.is_zero() || cancel.is_cancelled() {
            return reply;
        }

        let backoff = backoff_duration(attempt);
        if backoff >= remaining {
            return reply;
        }
        tokio::time::sleep(backoff).await;
    }
}

fn backoff_duration(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    let millis = (base_ms as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(millis)
}

fn normalize_weights(weights: Option<&[f64]>, n: usize) -> Vec<f64> {
    match weights {
        Some(w) if w.len() == n && !w.is_empty() && w.iter().all(|x| *x > 0.0) => {
            let sum: f64 = w.iter().sum();
            w.iter().map(|x| x / sum).collect()
        }
        _ => vec![1.0 / n.max(1) as f64; n],
    }
}

fn model_reply_from_provider(reply: ProviderReply) -> ModelReply {
    let latency_ms = duration_ms(reply.latency);
    match reply.outcome {
        Ok(text) => {
            let token_estimate = reply.completion_tokens.is_none();
            let completion_tokens = Some(reply.completion_tokens.unwrap_or_else(|| estimate_tokens(&text)));
            ModelReply {
                model_id: reply.model_id,
                text: Some(text),
                success: true,
                error_kind: None,
                latency_ms,
                prompt_tokens: reply.prompt_tokens,
                completion_tokens,
                token_estimate,
                raw_confidence: 0.5,
                weight: 0.0,
                pairwise_score: 0.0,
            }
        }
        Err(e) => ModelReply {
            model_id: reply.model_id,
            text: None,
            success: false,
            error_kind: Some(error_kind_code(&e)),
            latency_ms,
            prompt_tokens: None,
            completion_tokens: None,
            token_estimate: false,
            raw_confidence: 0.5,
            weight: 0.0,
            pairwise_score: 0.0,
        },
    }
}

fn model_reply_canceled(model_id: String) -> ModelReply {
    ModelReply {
        model_id,
        text: None,
        success: false,
        error_kind: Some(ErrorKind::Canceled.code().to_string()),
        latency_ms: 0,
        prompt_tokens: None,
        completion_tokens: None,
        token_estimate: false,
        raw_confidence: 0.5,
        weight: 0.0,
        pairwise_score: 0.0,
    }
}

fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_weights_defaults_to_uniform_on_mismatch() {
        let w = normalize_weights(Some(&[1.0, 2.0]), 3);
        assert_eq!(w, vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn normalize_weights_normalizes_supplied_values() {
        let w = normalize_weights(Some(&[1.0, 1.0, 2.0]), 3);
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((w[2] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn normalize_weights_rejects_nonpositive_entries() {
        let w = normalize_weights(Some(&[1.0, -1.0]), 2);
        assert_eq!(w, vec![0.5, 0.5]);
    }

    #[test]
    fn token_estimate_matches_four_chars_per_token_heuristic() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }
}
