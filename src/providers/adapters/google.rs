//! Adapter for `google-generate`: `contents`/`parts` request shape,
//! `generationConfig` for sampling params, API key passed as a query
//! parameter rather than a header.

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
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(default)]
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

pub struct GoogleAdapter {
    http: Client,
}

impl GoogleAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
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

        let system_instruction = call
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| SystemInstruction {
                parts: vec![Part { text: m.content.clone() }],
            });

        let contents = call
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: if m.role == Role::Assistant { "model" } else { "user" },
                parts: vec![Part { text: m.content.clone() }],
            })
            .collect();

        let body = GenerateRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: call.temperature,
                max_output_tokens: call.max_tokens,
            },
        };

        let request = self
            .http
            .post(&call.model.endpoint_url)
            .query(&[("key", api_key.as_str())])
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
            Ok(parsed) => {
                let text = parsed
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text));
                match text {
                    Some(text) => {
                        let mut reply = timed_reply(&model_id, started, Ok(text));
                        reply.prompt_tokens = parsed.usage_metadata.as_ref().map(|u| u.prompt_token_count);
                        reply.completion_tokens =
                            parsed.usage_metadata.map(|u| u.candidates_token_count);
                        reply
                    }
                    None => timed_reply(
                        &model_id,
                        started,
                        Err(ErrorKind::ProviderParseError {
                            model_id: model_id.clone(),
                        }),
                    ),
                }
            }
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
