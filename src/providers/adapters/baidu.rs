//! Adapter for `baidu-ernie`: the one vendor whose credential is an API
//! key/secret pair exchanged for a short-lived OAuth access token
//! rather than sent directly. The access token is cached in-process for 30
//! minutes, short of Baidu's own ~30-day expiry, so a single adapter
//! instance can serve many requests without re-authenticating each time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::credentials;
use crate::core::error::ErrorKind;
use crate::providers::adapters::{timed_reply, timeout_reply};
use crate::providers::{ProviderAdapter, ProviderCall, ProviderReply, Role};

const TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
const OAUTH_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

#[derive(Serialize)]
struct ChatRequest {
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

pub struct BaiduErnieAdapter {
    http: Client,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl BaiduErnieAdapter {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            token: Arc::new(RwLock::new(None)),
        }
    }

    async fn access_token(&self, api_key: &str, secret_key: &str) -> Result<String, ErrorKind> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .post(OAUTH_URL)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", api_key),
                ("client_secret", secret_key),
            ])
            .send()
            .await
            .map_err(|_| ErrorKind::ProviderHttpError {
                model_id: "baidu-ernie".to_string(),
                status: 0,
                transient: true,
            })?;

        let parsed: TokenResponse = response.json().await.map_err(|_| ErrorKind::ProviderParseError {
            model_id: "baidu-ernie".to_string(),
        })?;

        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            token: parsed.access_token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl ProviderAdapter for BaiduErnieAdapter {
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
        let Some(secret_key) = call
            .model
            .credential_secret_ref
            .as_deref()
            .and_then(credentials::resolve)
        else {
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

        let access_token = match self.access_token(&api_key, &secret_key).await {
            Ok(token) => token,
            Err(kind) => return timed_reply(&model_id, started, Err(kind)),
        };

        let messages = call
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Message {
                role: if m.role == Role::Assistant { "assistant" } else { "user" },
                content: m.content.clone(),
            })
            .collect();

        let body = ChatRequest {
            messages,
            temperature: call.temperature.max(0.01),
        };

        let request = self
            .http
            .post(&call.model.endpoint_url)
            .query(&[("access_token", access_token.as_str())])
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

        match response.json::<ChatResponse>().await {
            Ok(parsed) => {
                if let Some(text) = parsed.result {
                    timed_reply(&model_id, started, Ok(text))
                } else {
                    tracing::warn!(
                        model = %model_id,
                        error_code = ?parsed.error_code,
                        error_msg = ?parsed.error_msg,
                        "baidu ernie returned an application-level error"
                    );
                    timed_reply(
                        &model_id,
                        started,
                        Err(ErrorKind::ProviderParseError {
                            model_id: model_id.clone(),
                        }),
                    )
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
