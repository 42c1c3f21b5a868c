//! Adapter for the OpenAI-shaped chat-completion wire format, shared by
//! `openai-chat`, `moonshot-chat`, `zhipu-chat`, and `mistral-chat`:
//! `{model, messages, temperature, max_tokens}` in, `choices[0].message
//! .content` out.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::credentials;
use crate::core::error::ErrorKind;
use crate::providers::adapters::{timed_reply, timeout_reply};
use crate::providers::{ProviderAdapter, ProviderCall, ProviderReply, Role};

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub struct OpenAiLikeAdapter {
    http: Client,
}

impl OpenAiLikeAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiLikeAdapter {
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

        let body = ChatRequest {
            model: call.model.model_name.clone(),
            messages: call
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: role_str(m.role),
                    content: m.content.clone(),
                })
                .collect(),
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
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(model = %model_id, status = %status, body = %text, "provider returned an error response");
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

        match response.json::<ChatResponse>().await {
            Ok(parsed) => match parsed.choices.into_iter().next() {
                Some(choice) => {
                    let mut reply = timed_reply(&model_id, started, Ok(choice.message.content));
                    reply.prompt_tokens = parsed.usage.as_ref().map(|u| u.prompt_tokens);
                    reply.completion_tokens = parsed.usage.map(|u| u.completion_tokens);
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
