//! Adapter for `cohere-generate`: single-string `prompt` instead of a
//! messages array, `generations[0].text` in the response. The
//! chat history is flattened into one prompt with role labels since the
//! classic `/generate` endpoint has no native multi-turn shape.

use std::fmt::Write as _;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::credentials;
use crate::core::error::ErrorKind;
use crate::providers::adapters::{timed_reply, timeout_reply};
use crate::providers::{ProviderAdapter, ProviderCall, ProviderReply, Role};

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    temperature: f32,
    #[serde(rename = "max_tokens")]
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    generations: Vec<Generation>,
}

#[derive(Deserialize)]
struct Generation {
    text: String,
}

fn flatten_prompt(messages: &[crate::providers::PromptMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let _ = writeln!(prompt, "{label}: {}", message.content);
    }
    prompt.push_str("Assistant:");
    prompt
}

pub struct CohereAdapter {
    http: Client,
}

impl CohereAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    async fn invoke(&self, call: ProviderCall) -> ProviderReply {
        let started = Instant::now();
        let model_id = call.model.id.clone();

        let Some(api_key) = credentials::resolve(&call.model.credential_ref) else {
            return timed_reply(
                &model_id,
                started,
                Err(ErrorKind::ProviderHttpError {
                    model_id: model_id.clone(),
                    status: 401,
                    transient: false,
                }),
            );
        };

        let body = GenerateRequest {
            model: call.model.model_name.clone(),
            prompt: flatten_prompt(&call.messages),
            temperature: call.temperature,
            max_tokens: call.max_tokens,
        };

        let request = self
            .http
            .post(&call.model.endpoint_url)
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = match tokio::time::timeout(call.remaining(), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return timed_reply(
                    &model_id,
                    started,
                    Err(ErrorKind::ProviderHttpError {
                        model_id: model_id.clone(),
                        status: 0,
                        transient: true,
                    }),
                )
            }
            Err(_) => return timeout_reply(&model_id, started),
        };

        let status = response.status();
        if !status.is_success() {
            let transient = status.is_server_error() || status.as_u16() == 429;
            return timed_reply(
                &model_id,
                started,
                Err(ErrorKind::ProviderHttpError {
                    model_id: model_id.clone(),
                    status: status.as_u16(),
                    transient,
                }),
            );
        }

        match response.json::<GenerateResponse>().await {
            Ok(parsed) => match parsed.generations.into_iter().next() {
                Some(generation) => timed_reply(&model_id, started, Ok(generation.text)),
                None => timed_reply(
                    &model_id,
                    started,
                    Err(ErrorKind::ProviderParseError {
                        model_id: model_id.clone(),
                    }),
                ),
            },
            Err(_) => timed_reply(
                &model_id,
                started,
                Err(ErrorKind::ProviderParseError {
                    model_id: model_id.clone(),
                }),
            ),
        }
    }
}
