//! Result and embedding cache: an `LruCache` behind a `tokio::sync::RwLock`,
//! SHA-256 keys, and a TTL stamped on each entry. This cache holds exactly
//! two things (`ConsensusResult`s and embeddings) and degrades to a
//! [`NullCache`] that always misses when the configured backend is
//! unavailable, rather than failing the request.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::consensus::types::ConsensusResult;

const DEFAULT_CAPACITY: usize = 4096;
const EMBEDDING_TTL: Duration = Duration::from_secs(24 * 3600);

/// Storage for both cached artifact kinds the engine needs.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_result(&self, fingerprint: &str) -> Option<ConsensusResult>;
    async fn put_result(&self, fingerprint: &str, result: ConsensusResult);
    async fn get_embedding(&self, text: &str) -> Option<Vec<f32>>;
    async fn put_embedding(&self, text: &str, embedding: Vec<f32>);
    async fn invalidate(&self, fingerprint: &str);
}

fn hash_key(prefix: &str, input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{prefix}:{digest:x}")
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// In-memory LRU cache with per-entry TTL, the normal backend when
/// `cache_backend_url` is configured.
pub struct InMemoryCache {
    results: RwLock<LruCache<String, Entry<ConsensusResult>>>,
    embeddings: RwLock<LruCache<String, Entry<Vec<f32>>>>,
    result_ttl: Duration,
}

impl InMemoryCache {
    pub fn new(capacity: usize, result_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1");
        Self {
            results: RwLock::new(LruCache::new(capacity)),
            embeddings: RwLock::new(LruCache::new(capacity)),
            result_ttl,
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(3600))
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_result(&self, fingerprint: &str) -> Option<ConsensusResult> {
        let key = hash_key("result", fingerprint);
        let mut guard = self.results.write().await;
        match guard.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.pop(&key);
                None
            }
            None => None,
        }
    }

    async fn put_result(&self, fingerprint: &str, result: ConsensusResult) {
        let key = hash_key("result", fingerprint);
        let entry = Entry {
            value: result,
            expires_at: Instant::now() + self.result_ttl,
        };
        self.results.write().await.put(key, entry);
    }

    async fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = hash_key("emb", text);
        let mut guard = self.embeddings.write().await;
        match guard.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.pop(&key);
                None
            }
            None => None,
        }
    }

    async fn put_embedding(&self, text: &str, embedding: Vec<f32>) {
        let key = hash_key("emb", text);
        let entry = Entry {
            value: embedding,
            expires_at: Instant::now() + EMBEDDING_TTL,
        };
        self.embeddings.write().await.put(key, entry);
    }

    async fn invalidate(&self, fingerprint: &str) {
        let key = hash_key("result", fingerprint);
        self.results.write().await.pop(&key);
    }
}

/// Always-miss cache used when the configured backend is absent or has
/// failed health checks — the degrade path that ensures an outage in the
/// cache never fails a request, only slows it down.
#[derive(Default)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get_result(&self, _fingerprint: &str) -> Option<ConsensusResult> {
        None
    }

    async fn put_result(&self, _fingerprint: &str, _result: ConsensusResult) {}

    async fn get_embedding(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    async fn put_embedding(&self, _text: &str, _embedding: Vec<f32>) {}

    async fn invalidate(&self, _fingerprint: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::ConsensusResult;

    fn sample_result() -> ConsensusResult {
        use crate::consensus::types::ConsensusMethod;

        ConsensusResult {
            consensus_text: "answer".to_string(),
            consensus_score: 0.9,
            per_model: Vec::new(),
            method_used: ConsensusMethod::DirectConsensus,
            models_used: vec!["m1".to_string()],
            cache_hit: false,
            total_latency_ms: 0,
            chain_trace: None,
            quality_metrics: Default::default(),
            adaptive_weights: Default::default(),
            partial: false,
        }
    }

    #[tokio::test]
    async fn round_trips_a_result() {
        let cache = InMemoryCache::new(16, Duration::from_secs(60));
        assert!(cache.get_result("fp1").await.is_none());
        cache.put_result("fp1", sample_result()).await;
        let hit = cache.get_result("fp1").await.unwrap();
        assert_eq!(hit.consensus_text, "answer");
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = InMemoryCache::new(16, Duration::from_millis(1));
        cache.put_result("fp1", sample_result()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get_result("fp1").await.is_none());
    }

    #[tokio::test]
    async fn null_cache_always_misses() {
        let cache = NullCache;
        cache.put_result("fp1", sample_result()).await;
        assert!(cache.get_result("fp1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = InMemoryCache::default();
        cache.put_result("fp1", sample_result()).await;
        cache.invalidate("fp1").await;
        assert!(cache.get_result("fp1").await.is_none());
    }
}
