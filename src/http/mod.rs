//! Request router: `warp` filters composed with `.or`, a `with_state`-style
//! injection helper, custom `Reject` types carrying a typed error, and a
//! single `recover` handler translating every rejection into the uniform
//! JSON error envelope.

pub mod dto;

use std::convert::Infallible;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::analytics::{AnalyticsSink, FeedbackRecord};
use crate::consensus::ConsensusEngine;
use crate::core::error::ErrorKind;
use crate::models::ModelRegistry;
use crate::ratelimit::{AuthGate, RateLimiter, RouteClass};

use dto::{AnalyticsQuery, BatchEntry, BatchRequestBody, BatchResponse, BatchSummary, ConsensusRequestBody, ErrorEnvelope, FeedbackBody, ModelStatus};

/// Everything a request handler needs, cheap to clone (every field is an
/// `Arc` or already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConsensusEngine>,
    pub models: Arc<ModelRegistry>,
    pub analytics: Arc<AnalyticsSink>,
    pub rate_limiter: Arc<RateLimiter>,
    pub auth_gate: Arc<AuthGate>,
    pub inflight: Arc<Semaphore>,
    pub allowed_origins: Vec<String>,
}

/// A failure that survived every component boundary and now needs
/// translating to an HTTP response — only the router layer does that
/// translation; every other component deals in `ErrorKind`.
#[derive(Debug)]
struct Rejected(ErrorKind);
impl warp::reject::Reject for Rejected {}

fn reject(kind: ErrorKind) -> Rejection {
    warp::reject::custom(Rejected(kind))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Validate the `Authorization` header and consult the rate limiter for
/// `class`, returning the bearer token (used only as the rate-limit key).
fn authorized(state: AppState, class: RouteClass) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(move |header: Option<String>, state: AppState| async move {
            let token = state
                .auth_gate
                .authorize(header.as_deref())
                .map(|t| t.to_string())
                .map_err(reject)?;
            state.rate_limiter.check(&token, class).await.map_err(reject)?;
            Ok::<String, Rejection>(token)
        })
}

fn acquire_inflight(state: &AppState) -> Result<OwnedSemaphorePermit, Rejection> {
    state
        .inflight
        .clone()
        .try_acquire_owned()
        .map_err(|_| reject(ErrorKind::Overloaded))
}

/// Build the full set of routes, CORS layer included.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = build_cors(&state.allowed_origins);

    let health = warp::path("health").and(warp::get()).and(with_state(state.clone())).and_then(handle_health);

    let docs = warp::path("docs").and(warp::get()).map(serve_docs_page);

    let openapi = warp::path("openapi.json").and(warp::get()).map(serve_openapi);

    let consensus = warp::path("consensus")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and(authorized(state.clone(), RouteClass::Consensus))
        .and_then(handle_consensus);

    let consensus_batch = warp::path!("consensus" / "batch")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and(authorized(state.clone(), RouteClass::Batch))
        .and_then(handle_batch);

    let models = warp::path("models")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(authorized(state.clone(), RouteClass::ReadOnly))
        .and_then(handle_models);

    let analytics_performance = warp::path!("analytics" / "performance")
        .and(warp::get())
        .and(warp::query::<AnalyticsQuery>())
        .and(with_state(state.clone()))
        .and(authorized(state.clone(), RouteClass::ReadOnly))
        .and_then(handle_analytics_performance);

    let feedback = warp::path("feedback")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and(authorized(state.clone(), RouteClass::ReadOnly))
        .and_then(handle_feedback);

    health
        .or(docs)
        .or(openapi)
        .or(consensus)
        .or(consensus_batch)
        .or(models)
        .or(analytics_performance)
        .or(feedback)
        .recover(handle_rejection)
        .with(cors)
}

fn build_cors(allowed_origins: &[String]) -> warp::cors::Builder {
    let mut cors = warp::cors()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["Content-Type", "Authorization"]);
    for origin in allowed_origins {
        cors = cors.allow_origin(origin.as_str());
    }
    cors
}

async fn handle_health(state: AppState) -> Result<impl Reply, Rejection> {
    let enabled_models = state.models.enabled().await.len();
    let body = serde_json::json!({
        "status": "ok",
        "enabled_models": enabled_models,
        "analytics_dropped_total": state.analytics.dropped_count(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK))
}

fn serve_docs_page() -> impl Reply {
    warp::reply::html(DOCS_HTML)
}

fn serve_openapi() -> impl Reply {
    warp::reply::with_status(warp::reply::json(&openapi_document()), StatusCode::OK)
}

async fn handle_consensus(body: ConsensusRequestBody, state: AppState, _token: String) -> Result<impl Reply, Rejection> {
    let _permit = acquire_inflight(&state)?;
    let request = dto::to_consensus_request(body, &state.models).await.map_err(reject)?;
    let result = state.engine.run(request).await.map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply::json(&result), StatusCode::OK))
}

async fn handle_batch(body: BatchRequestBody, state: AppState, _token: String) -> Result<impl Reply, Rejection> {
    let _permit = acquire_inflight(&state)?;
    dto::validate_batch_size(&body).map_err(reject)?;

    let tasks = body.queries.into_iter().map(|query| {
        let state = state.clone();
        async move {
            match dto::to_consensus_request(query, &state.models).await {
                Ok(request) => match state.engine.run(request).await {
                    Ok(result) => BatchEntry::Ok(result),
                    Err(e) => BatchEntry::Err(ErrorEnvelope::from_kind(&e)),
                },
                Err(e) => BatchEntry::Err(ErrorEnvelope::from_kind(&e)),
            }
        }
    });

    let results: Vec<BatchEntry> = join_all(tasks).await;
    let total = results.len();
    let succeeded = results.iter().filter(|r| matches!(r, BatchEntry::Ok(_))).count();
    let failed = total - succeeded;

    let response = BatchResponse {
        results,
        summary: BatchSummary { total, succeeded, failed },
    };
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK))
}

async fn handle_models(state: AppState, _token: String) -> Result<impl Reply, Rejection> {
    let _permit = acquire_inflight(&state)?;
    let statuses: Vec<ModelStatus> = state
        .models
        .all()
        .await
        .into_iter()
        .map(|d| ModelStatus {
            id: d.id,
            display_name: d.display_name,
            provider_kind: d.provider_kind,
            enabled: d.enabled,
            max_tokens: d.max_tokens,
            cost_per_1k_tokens: d.cost_per_1k_tokens,
        })
        .collect();
    Ok(warp::reply::with_status(warp::reply::json(&statuses), StatusCode::OK))
}

async fn handle_analytics_performance(
    query: AnalyticsQuery,
    state: AppState,
    _token: String,
) -> Result<impl Reply, Rejection> {
    let _permit = acquire_inflight(&state)?;
    let window = parse_timeframe(&query.timeframe);

    let body = match query.metric_type.as_str() {
        "models" => {
            let rows = state
                .analytics
                .model_performance(window)
                .await
                .map_err(|e| reject(ErrorKind::Internal(e.to_string())))?;
            warp::reply::json(&rows)
        }
        "trend" => {
            let rows = state
                .analytics
                .trend(window, ChronoDuration::hours(1))
                .await
                .map_err(|e| reject(ErrorKind::Internal(e.to_string())))?;
            warp::reply::json(&rows)
        }
        _ => {
            let summary = state
                .analytics
                .summary(window)
                .await
                .map_err(|e| reject(ErrorKind::Internal(e.to_string())))?;
            warp::reply::json(&summary)
        }
    };

    Ok(warp::reply::with_status(body, StatusCode::OK))
}

async fn handle_feedback(body: FeedbackBody, state: AppState, _token: String) -> Result<impl Reply, Rejection> {
    let _permit = acquire_inflight(&state)?;
    if !(1..=5).contains(&body.rating) {
        return Err(reject(ErrorKind::InvalidRequest("rating must be 1..5".to_string())));
    }

    state.analytics.record_feedback(FeedbackRecord {
        consensus_id: body.consensus_id,
        rating: body.rating,
        comment: body.comment,
        timestamp: chrono::Utc::now(),
    });

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "status": "recorded" })),
        StatusCode::OK,
    ))
}

fn parse_timeframe(raw: &str) -> ChronoDuration {
    let raw = raw.trim();
    let (digits, suffix) = raw.split_at(raw.len().saturating_sub(1));
    if let Ok(n) = digits.parse::<i64>() {
        match suffix {
            "h" => return ChronoDuration::hours(n),
            "d" => return ChronoDuration::days(n),
            "m" => return ChronoDuration::minutes(n),
            _ => {}
        }
    }
    ChronoDuration::hours(24)
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let kind = if err.is_not_found() {
        ErrorKind::InvalidRequest("no such route".to_string())
    } else if let Some(Rejected(kind)) = err.find::<Rejected>() {
        kind.clone()
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        ErrorKind::InvalidRequest("malformed request body".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ErrorKind::InvalidRequest("method not allowed".to_string())
    } else {
        ErrorKind::Internal("unhandled rejection".to_string())
    };

    let status = match kind.http_status() {
        499 => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        other => StatusCode::from_u16(other).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let mut reply = warp::reply::with_status(warp::reply::json(&ErrorEnvelope::from_kind(&kind)), status).into_response();
    if let ErrorKind::RateLimited { retry_after } = kind {
        if let Ok(value) = retry_after.to_string().parse() {
            reply.headers_mut().insert("Retry-After", value);
        }
    }

    Ok(reply)
}

const DOCS_HTML: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>consensus-gateway API docs</title></head>
<body>
<h1>consensus-gateway</h1>
<p>Multi-model LLM consensus gateway. See <a href="/openapi.json">/openapi.json</a> for the machine-readable contract.</p>
<ul>
<li>POST /consensus</li>
<li>POST /consensus/batch</li>
<li>GET /models</li>
<li>GET /analytics/performance</li>
<li>GET /health</li>
<li>POST /feedback</li>
</ul>
</body>
</html>"#;

fn openapi_document() -> serde_json::Value {
    serde_json::json!({
        "openapi": "3.0.3",
        "info": { "title": "consensus-gateway", "version": env!("CARGO_PKG_VERSION") },
        "paths": {
            "/consensus": { "post": { "summary": "Run one consensus query", "responses": { "200": { "description": "ConsensusResult" } } } },
            "/consensus/batch": { "post": { "summary": "Run up to 50 consensus queries", "responses": { "200": { "description": "BatchResponse" } } } },
            "/models": { "get": { "summary": "List configured models", "responses": { "200": { "description": "model status list" } } } },
            "/analytics/performance": { "get": { "summary": "Aggregate analytics", "responses": { "200": { "description": "Summary, model performance, or trend" } } } },
            "/health": { "get": { "summary": "Liveness probe", "responses": { "200": { "description": "health status" } } } },
            "/feedback": { "post": { "summary": "Submit a 1-5 rating for a prior result", "responses": { "200": { "description": "acknowledgement" } } } }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parses_hours_days_minutes() {
        assert_eq!(parse_timeframe("24h"), ChronoDuration::hours(24));
        assert_eq!(parse_timeframe("7d"), ChronoDuration::days(7));
        assert_eq!(parse_timeframe("30m"), ChronoDuration::minutes(30));
    }

    #[test]
    fn timeframe_falls_back_to_24h_on_garbage() {
        assert_eq!(parse_timeframe("whenever"), ChronoDuration::hours(24));
    }
}
