//! Provider adapters: one vendor wire shape per implementation, registered
//! behind a shared `ProviderAdapter` trait.
//!
//! Every vendor speaks a different wire protocol but the engine only ever
//! sees [`ProviderAdapter::invoke`]. An adapter never panics and never
//! returns `Err` to its caller: network failures, timeouts, and malformed
//! responses are all folded into a [`ProviderReply`] so the engine can keep
//! fanning out to the rest of the ensemble without a `?` chain unwinding the
//! whole request.

pub mod adapters;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::core::error::ErrorKind;
use crate::models::{ModelDescriptor, ProviderKind};

/// One message in a chat-style prompt, vendor-agnostic.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Everything an adapter needs to make one vendor call.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub model: ModelDescriptor,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Remaining time this call may spend before the shared request deadline.
    pub deadline: Instant,
}

impl ProviderCall {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Outcome of one provider call. `Err` carries an `ErrorKind` that is always
/// one of `ProviderTimeout`, `ProviderHttpError`, or `ProviderParseError`.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub model_id: String,
    pub outcome: Result<String, ErrorKind>,
    pub latency: Duration,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A single vendor wire-protocol implementation.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Perform one call. Must honor `call.deadline` and never panic.
    async fn invoke(&self, call: ProviderCall) -> ProviderReply;
}

/// All configured adapters, keyed by the protocol they implement.
///
/// One registry entry per [`ProviderKind`] variant, built once at startup and
/// shared behind an `Arc` — there is no per-request client construction.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build the registry with the shared `reqwest::Client` used by every
    /// adapter: pooled connections, a 5s connect timeout, and at least 64
    /// idle connections kept per host.
    pub fn new() -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(64)
            .build()
            .expect("reqwest client construction with static config cannot fail");

        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(
            ProviderKind::OpenaiChat,
            Arc::new(adapters::openai_like::OpenAiLikeAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::MoonshotChat,
            Arc::new(adapters::openai_like::OpenAiLikeAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::ZhipuChat,
            Arc::new(adapters::openai_like::OpenAiLikeAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::MistralChat,
            Arc::new(adapters::openai_like::OpenAiLikeAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::AnthropicMessages,
            Arc::new(adapters::anthropic::AnthropicAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::GoogleGenerate,
            Arc::new(adapters::google::GoogleAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::CohereGenerate,
            Arc::new(adapters::cohere::CohereAdapter::new(http.clone())),
        );
        adapters.insert(
            ProviderKind::BaiduErnie,
            Arc::new(adapters::baidu::BaiduErnieAdapter::new(http.clone())),
        );

        debug_assert_eq!(
            adapters.len(),
            ProviderKind::ALL.len(),
            "every ProviderKind variant must have a registered adapter"
        );

        Self { adapters }
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
        self.adapters
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| panic!("no adapter registered for {kind:?}"))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
