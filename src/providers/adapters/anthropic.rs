//! Adapter for `anthropic-messages`: `x-api-key` + `anthropic-version`
//! headers, `content[0].text` in the response.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::credentials;
use crate::core::error::ErrorKind;
use crate::providers::adapters::{timed_reply, timeout_reply};
use crate::providers::{ProviderAdapter, ProviderCall, ProviderReply, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicAdapter {
    http: Client,
}

impl AnthropicAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
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

        // Anthropic takes the system prompt out-of-band from `messages`.
        let system = call
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let messages = call
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Message {
                role: if m.role == Role::Assistant { "assistant" } else { "user" },
                content: m.content.clone(),
            })
            .collect();

        let body = MessagesRequest {
            model: call.model.model_name.clone(),
            system,
            messages,
            temperature: call.temperature,
            max_tokens: call.max_tokens,
        };

        let request = self
            .http
            .post(&call.model.endpoint_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        match response.json::<MessagesResponse>().await {
            Ok(parsed) => match parsed.content.into_iter().find_map(|b| b.text) {
                Some(text) => {
                    let mut reply = timed_reply(&model_id, started, Ok(text));
                    reply.prompt_tokens = parsed.usage.as_ref().map(|u| u.input_tokens);
                    reply.completion_tokens = parsed.usage.map(|u| u.output_tokens);
                    reply
                }
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
