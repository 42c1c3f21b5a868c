//! consensus-gateway binary entry point.
//!
//! Assembles configuration, the model registry, the cache, rate limiter,
//! analytics sink, and provider registry, wires them into the consensus
//! engine, and serves the HTTP surface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Semaphore;

use consensus_gateway::cache::{Cache, InMemoryCache, NullCache};
use consensus_gateway::consensus::{ConsensusEngine, EngineDeps};
use consensus_gateway::core::logging;
use consensus_gateway::http::{self, AppState};
use consensus_gateway::models::ModelRegistry;
use consensus_gateway::providers::ProviderRegistry;
use consensus_gateway::ratelimit::{AuthGate, RateLimiter};
use consensus_gateway::AppConfig;
use consensus_gateway::analytics::AnalyticsSink;

/// Command-line overrides for the startup configuration.
///
/// Most configuration comes from the environment; these two knobs are the
/// ones an operator reaches for most often when starting the process by
/// hand.
#[derive(Debug, Parser)]
#[command(name = "consensus-gateway", version, about = "Multi-model LLM consensus gateway")]
struct Args {
    /// Path to the model-descriptor YAML/JSON file. Overrides `MODELS_FILE`.
    #[arg(long, env = "MODELS_FILE")]
    models_file: Option<PathBuf>,

    /// Address to bind the HTTP server to. Overrides `LISTEN_ADDR`.
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<std::net::SocketAddr>,

    /// Path to the sqlite database backing the analytics sink.
    #[arg(long, env = "ANALYTICS_DB_PATH", default_value = "analytics.sqlite")]
    analytics_db_path: PathBuf,

    /// Maximum number of analytics records buffered before the sink starts
    /// dropping.
    #[arg(long, env = "ANALYTICS_MAX_BACKLOG", default_value_t = 10_000)]
    analytics_max_backlog: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();
    let args = Args::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };
    if let Some(models_file) = args.models_file {
        config.models_file = models_file;
    }
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    match run(config, &args.analytics_db_path, args.analytics_max_backlog).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal dependency failure during startup");
            ExitCode::from(2)
        }
    }
}

async fn run(config: AppConfig, analytics_db_path: &std::path::Path, analytics_max_backlog: usize) -> anyhow::Result<()> {
    let models = Arc::new(ModelRegistry::load(&config.models_file).await?);
    let providers = Arc::new(ProviderRegistry::new());

    let cache: Arc<dyn Cache> = match &config.cache_backend_url {
        Some(_) => Arc::new(InMemoryCache::new(4096, config.cache_ttl)),
        None => {
            tracing::warn!("CACHE_BACKEND_URL not set, running with a null cache (always misses)");
            Arc::new(NullCache)
        }
    };

    let analytics = Arc::new(AnalyticsSink::open(analytics_db_path, analytics_max_backlog)?);
    let rate_limiter = Arc::new(RateLimiter::new());
    let auth_gate = Arc::new(AuthGate::new(config.backend_tokens.clone()));
    let inflight = Arc::new(Semaphore::new(config.max_inflight_requests));

    let engine = Arc::new(ConsensusEngine::new(EngineDeps {
        models: models.clone(),
        providers,
        cache,
        analytics: analytics.clone(),
        request_timeout: config.request_timeout,
        max_concurrent_per_request: config.max_concurrent_per_request,
        low_consensus_threshold: config.low_consensus_threshold,
        high_consensus_threshold: config.high_consensus_threshold,
    }));

    let state = AppState {
        engine,
        models,
        analytics,
        rate_limiter,
        auth_gate,
        inflight,
        allowed_origins: config.allowed_origins.clone(),
    };

    tracing::info!(addr = %config.listen_addr, "consensus-gateway listening");
    warp::serve(http::routes(state)).run(config.listen_addr).await;

    Ok(())
}
