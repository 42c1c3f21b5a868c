//! End-to-end scenarios driven against real `ConsensusEngine` + adapter
//! instances with `wiremock` standing in for the eight vendor HTTP
//! endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consensus_gateway::analytics::AnalyticsSink;
use consensus_gateway::cache::InMemoryCache;
use consensus_gateway::consensus::{
    ConsensusEngine, ConsensusMethod, ConsensusRequest, EngineDeps, ReasoningMethod,
};
use consensus_gateway::models::ModelRegistry;
use consensus_gateway::providers::ProviderRegistry;

/// One mock vendor endpoint speaking the `openai-chat` wire shape, wired to
/// a unique credential env var so many can coexist in one process.
struct StubModel {
    id: String,
    server: MockServer,
    credential_ref: String,
}

async fn openai_stub(id: &str, reply_text: &str, delay: Option<Duration>) -> StubModel {
    let server = MockServer::start().await;
    let mut response = ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": reply_text } }],
        "usage": { "completion_tokens": 3 }
    }));
    if let Some(delay) = delay {
        response = response.set_delay(delay);
    }
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(response)
        .mount(&server)
        .await;

    let credential_ref = format!("TEST_CRED_{}", id.to_uppercase());
    std::env::set_var(&credential_ref, "sk-test");

    StubModel {
        id: id.to_string(),
        server,
        credential_ref,
    }
}

async fn failing_stub(id: &str) -> StubModel {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let credential_ref = format!("TEST_CRED_{}", id.to_uppercase());
    std::env::set_var(&credential_ref, "sk-test");

    StubModel {
        id: id.to_string(),
        server,
        credential_ref,
    }
}

fn descriptor_yaml(models: &[&StubModel]) -> String {
    let mut doc = String::from("models:\n");
    let mut ids = Vec::new();
    for m in models {
        doc.push_str(&format!(
            "  {id}:\n    provider_kind: openai-chat\n    model_name: test-model\n    \
             endpoint: {endpoint}/chat\n    credential_ref: {cred}\n    max_tokens: 256\n",
            id = m.id,
            endpoint = m.server.uri(),
            cred = m.credential_ref,
        ));
        ids.push(m.id.clone());
    }
    doc.push_str(&format!("default_models: [{}]\n", ids.join(", ")));
    doc
}

fn tmp_sqlite_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("consensus-gateway-scenario-{}.sqlite", Uuid::new_v4()));
    path
}

async fn build_engine(models: &[&StubModel], request_timeout: Duration) -> ConsensusEngine {
    let yaml = descriptor_yaml(models);
    let registry = Arc::new(ModelRegistry::parse(&yaml).unwrap());
    let providers = Arc::new(ProviderRegistry::new());
    let cache = Arc::new(InMemoryCache::new(64, Duration::from_secs(60)));
    let analytics = Arc::new(AnalyticsSink::open(&tmp_sqlite_path(), 64).unwrap());

    ConsensusEngine::new(EngineDeps {
        models: registry,
        providers,
        cache,
        analytics,
        request_timeout,
        max_concurrent_per_request: 10,
        low_consensus_threshold: 0.85,
        high_consensus_threshold: 0.90,
    })
}

fn request(question: &str, model_ids: Vec<String>, method: ConsensusMethod) -> ConsensusRequest {
    ConsensusRequest {
        question: question.to_string(),
        roles: Vec::new(),
        selected_model_ids: model_ids,
        method,
        temperature: 0.7,
        weights: None,
        chain_depth: 2,
        enable_chain_of_thought: false,
        enable_caching: true,
        reasoning_method: ReasoningMethod::ChainOfThought,
        max_models: 5,
    }
}

/// Scenario 1: happy path, three models agree.
#[tokio::test]
async fn three_models_agree_on_the_answer() {
    let m1 = openai_stub("m1", "4", None).await;
    let m2 = openai_stub("m2", "4", None).await;
    let m3 = openai_stub("m3", "4", None).await;
    let engine = build_engine(&[&m1, &m2, &m3], Duration::from_secs(5)).await;

    let mut req = request(
        "What is 2+2?",
        vec!["m1".into(), "m2".into(), "m3".into()],
        ConsensusMethod::DirectConsensus,
    );
    req.weights = Some(vec![1.0, 1.0, 1.0]);
    req.enable_caching = false;

    let result = engine.run(req).await.expect("three agreeing models should succeed");

    assert_eq!(result.consensus_text, "4");
    assert!((result.consensus_score - 1.0).abs() < 1e-6);
    assert!(!result.cache_hit);
    assert_eq!(result.per_model.len(), 3);
    assert!(result.per_model.iter().all(|r| r.success));
}

/// Scenario 2: cache hit replays the same semantic result.
#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let m1 = openai_stub("m1", "4", None).await;
    let m2 = openai_stub("m2", "4", None).await;
    let engine = build_engine(&[&m1, &m2], Duration::from_secs(5)).await;

    let req = request(
        "What is 2+2?",
        vec!["m1".into(), "m2".into()],
        ConsensusMethod::DirectConsensus,
    );

    let first = engine.run(req.clone()).await.unwrap();
    assert!(!first.cache_hit);

    let second = engine.run(req).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.consensus_text, first.consensus_text);
    assert_eq!(second.models_used, first.models_used);
    assert!((second.consensus_score - first.consensus_score).abs() < 1e-9);
}

/// Scenario 3: low agreement between two divergent replies triggers chain refinement.
#[tokio::test]
async fn low_agreement_triggers_chain_refinement() {
    let m1 = openai_stub("m1", "Python", None).await;
    let m2 = openai_stub("m2", "JavaScript", None).await;
    let engine = build_engine(&[&m1, &m2], Duration::from_secs(5)).await;

    let mut req = request(
        "What language should I learn first?",
        vec!["m1".into(), "m2".into()],
        ConsensusMethod::ExpertRoles,
    );
    req.chain_depth = 1;
    req.enable_caching = false;

    let result = engine.run(req).await.unwrap();

    let trace = result.chain_trace.expect("low agreement must produce a chain trace");
    assert_eq!(trace.len(), 1);
    assert_eq!(result.method_used, ConsensusMethod::ExpertRoles);
    // Both the critic's reply and the revised answer came back as "4" (the
    // mock always answers with its configured fixed text), so the revised
    // score cannot be lower than the original distinct-answer agreement.
    assert!(trace[0].new_score >= 0.0);
}

/// Scenario 4: one provider times out, the other two still reach consensus.
#[tokio::test]
async fn one_provider_timeout_does_not_fail_the_request() {
    let m1 = openai_stub("m1", "4", None).await;
    let m2 = openai_stub("m2", "4", None).await;
    let slow = openai_stub("slow", "4", Some(Duration::from_secs(5))).await;
    let engine = build_engine(&[&m1, &m2, &slow], Duration::from_millis(300)).await;

    let mut req = request(
        "What is 2+2?",
        vec!["m1".into(), "m2".into(), "slow".into()],
        ConsensusMethod::DirectConsensus,
    );
    req.enable_caching = false;

    let result = engine.run(req).await.expect("two successes should still reach consensus");

    assert_eq!(result.per_model.len(), 3);
    let laggard = result.per_model.iter().find(|r| r.model_id == "slow").unwrap();
    assert!(!laggard.success);
    assert_eq!(laggard.error_kind.as_deref(), Some("provider_timeout"));

    let successes: Vec<_> = result.per_model.iter().filter(|r| r.success).collect();
    assert_eq!(successes.len(), 2);
}

/// Scenario 5: every provider fails, the request is rejected as `consensus_failed`.
#[tokio::test]
async fn all_providers_failing_is_consensus_failed() {
    let m1 = failing_stub("m1").await;
    let m2 = failing_stub("m2").await;
    let engine = build_engine(&[&m1, &m2], Duration::from_secs(5)).await;

    let req = request(
        "What is 2+2?",
        vec!["m1".into(), "m2".into()],
        ConsensusMethod::DirectConsensus,
    );

    let err = engine.run(req).await.unwrap_err();
    assert!(matches!(
        err,
        consensus_gateway::ErrorKind::ConsensusFailed { succeeded: 0, .. }
    ));
}

/// With `n=2` and one failure, the engine returns a partial result rather
/// than `consensus_failed`.
#[tokio::test]
async fn two_models_one_failure_returns_partial_result() {
    let m1 = openai_stub("m1", "4", None).await;
    let m2 = failing_stub("m2").await;
    let engine = build_engine(&[&m1, &m2], Duration::from_secs(5)).await;

    let req = request(
        "What is 2+2?",
        vec!["m1".into(), "m2".into()],
        ConsensusMethod::DirectConsensus,
    );

    let result = engine.run(req).await.expect("partial result, not an error");
    assert!(result.partial);
    assert_eq!(result.consensus_score, 0.0);
    assert_eq!(result.consensus_text, "4");
}
