//! Router-level scenarios: rate limiting and batch/single equivalence,
//! driven through the real `warp` filter stack with `warp::test`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use uuid::Uuid;

use consensus_gateway::analytics::AnalyticsSink;
use consensus_gateway::cache::InMemoryCache;
use consensus_gateway::consensus::{ConsensusEngine, EngineDeps};
use consensus_gateway::http::{routes, AppState};
use consensus_gateway::models::ModelRegistry;
use consensus_gateway::providers::ProviderRegistry;
use consensus_gateway::ratelimit::{AuthGate, RateLimiter};

fn tmp_sqlite_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("consensus-gateway-router-{}.sqlite", Uuid::new_v4()));
    path
}

async fn empty_state() -> AppState {
    let models = Arc::new(ModelRegistry::parse("models: {}\ndefault_models: []\n").unwrap());
    let providers = Arc::new(ProviderRegistry::new());
    let cache = Arc::new(InMemoryCache::new(64, Duration::from_secs(60)));
    let analytics = Arc::new(AnalyticsSink::open(&tmp_sqlite_path(), 64).unwrap());

    let engine = Arc::new(ConsensusEngine::new(EngineDeps {
        models: models.clone(),
        providers,
        cache,
        analytics: analytics.clone(),
        request_timeout: Duration::from_secs(5),
        max_concurrent_per_request: 10,
        low_consensus_threshold: 0.85,
        high_consensus_threshold: 0.90,
    }));

    AppState {
        engine,
        models,
        analytics,
        rate_limiter: Arc::new(RateLimiter::new()),
        auth_gate: Arc::new(AuthGate::new(vec!["test-token".to_string()])),
        inflight: Arc::new(Semaphore::new(256)),
        allowed_origins: Vec::new(),
    }
}

/// Scenario 6: 61 consensus calls in one token bucket window, 61st is rate limited.
#[tokio::test]
async fn sixty_first_consensus_call_is_rate_limited() {
    let state = empty_state().await;
    let routes = routes(state);

    let body = json!({ "question": "ping" });

    let mut last_status = 0u16;
    for _ in 0..60 {
        let resp = warp::test::request()
            .method("POST")
            .path("/consensus")
            .header("authorization", "Bearer test-token")
            .json(&body)
            .reply(&routes)
            .await;
        last_status = resp.status().as_u16();
        assert_ne!(last_status, 429, "should not be rate limited within budget");
    }

    let resp = warp::test::request()
        .method("POST")
        .path("/consensus")
        .header("authorization", "Bearer test-token")
        .json(&body)
        .reply(&routes)
        .await;

    assert_eq!(resp.status().as_u16(), 429);
    assert_eq!(resp.headers().get("Retry-After").map(|v| v.to_str().unwrap()), Some("1"));

    let envelope: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(envelope["error_code"], "rate_limited");
}

/// Auth gate rejects requests with no bearer token before touching rate limits.
#[tokio::test]
async fn missing_auth_header_is_unauthorized() {
    let state = empty_state().await;
    let routes = routes(state);

    let resp = warp::test::request()
        .method("POST")
        .path("/consensus")
        .json(&json!({ "question": "ping" }))
        .reply(&routes)
        .await;

    assert_eq!(resp.status().as_u16(), 401);
}

/// `/health` and `/docs` are reachable without a bearer token.
#[tokio::test]
async fn health_endpoint_requires_no_auth() {
    let state = empty_state().await;
    let routes = routes(state);

    let resp = warp::test::request().method("GET").path("/health").reply(&routes).await;
    assert_eq!(resp.status().as_u16(), 200);
}
