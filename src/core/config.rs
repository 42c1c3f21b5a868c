//! Startup configuration assembled once from environment variables.
//!
//! Constructed explicitly and passed by `Arc` to whichever components need
//! it — there is no ambient global `Option<Config>` singleton to thread
//! through `if let Some(cfg)` checks.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::credentials;
use crate::core::error::ConfigError;

/// Fully resolved runtime configuration for one process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bearer tokens accepted by the auth gate (`BACKEND_API_KEYS`).
    pub backend_tokens: Vec<String>,
    /// Path to the model-descriptor YAML/JSON file.
    pub models_file: PathBuf,
    /// Cache backend URL, or `None` to run with the null cache.
    pub cache_backend_url: Option<String>,
    /// TTL applied to cached `ConsensusResult`s and embeddings.
    pub cache_ttl: Duration,
    /// Shared per-request deadline for the provider fan-out.
    pub request_timeout: Duration,
    /// Fan-out width cap per request (`MAX_CONCURRENT_REQUESTS`).
    pub max_concurrent_per_request: usize,
    /// Global inflight-request cap used for backpressure.
    pub max_inflight_requests: usize,
    /// CORS allow-list; empty means no cross-origin requests are permitted.
    pub allowed_origins: Vec<String>,
    /// Agreement score below which the engine triggers chain refinement.
    pub low_consensus_threshold: f64,
    /// Agreement score considered comfortably high (surfaced in quality metrics).
    pub high_consensus_threshold: f64,
    /// Listen address for the HTTP server.
    pub listen_addr: std::net::SocketAddr,
}

impl AppConfig {
    /// Build configuration from the process environment.
    ///
    /// Fails with [`ConfigError::MissingEnvVar`] if `BACKEND_API_KEYS` is
    /// unset or empty — it has no built-in default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_tokens = credentials::resolve_backend_tokens();
        if backend_tokens.is_empty() {
            return Err(ConfigError::MissingEnvVar("BACKEND_API_KEYS".to_string()));
        }

        let models_file = env::var("MODELS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models.yaml"));

        let cache_backend_url = env::var("CACHE_BACKEND_URL").ok().filter(|s| !s.is_empty());

        let cache_ttl = Duration::from_secs(env_u64("CACHE_TTL_SECONDS", 3600));
        let request_timeout = Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECONDS", 30));
        let max_concurrent_per_request = env_usize("MAX_CONCURRENT_REQUESTS", 10);
        let max_inflight_requests = env_usize("MAX_INFLIGHT_REQUESTS", 256);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let low_consensus_threshold = env_f64("LOW_CONSENSUS_THRESHOLD", 0.85);
        let high_consensus_threshold = env_f64("HIGH_CONSENSUS_THRESHOLD", 0.90);

        let listen_addr = env::var("LISTEN_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "0.0.0.0:8080".parse().unwrap());

        Ok(Self {
            backend_tokens,
            models_file,
            cache_backend_url,
            cache_ttl,
            request_timeout,
            max_concurrent_per_request,
            max_inflight_requests,
            allowed_origins,
            low_consensus_threshold,
            high_consensus_threshold,
            listen_addr,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_backend_keys_is_an_error() {
        std::env::remove_var("BACKEND_API_KEYS");
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_match_spec() {
        std::env::set_var("BACKEND_API_KEYS", "tok1,tok2");
        std::env::remove_var("CACHE_TTL_SECONDS");
        std::env::remove_var("REQUEST_TIMEOUT_SECONDS");
        std::env::remove_var("LOW_CONSENSUS_THRESHOLD");
        std::env::remove_var("HIGH_CONSENSUS_THRESHOLD");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!((cfg.low_consensus_threshold - 0.85).abs() < 1e-9);
        assert!((cfg.high_consensus_threshold - 0.90).abs() < 1e-9);
        std::env::remove_var("BACKEND_API_KEYS");
    }
}
