//! Rate limiter & auth gate.
//!
//! The bucket arithmetic is hand-rolled rather than pulling in a generic
//! leaky-bucket crate: the `Retry-After` contract only needs the bucket's
//! own refill interval, and a few lines of token-bucket math are clearer
//! than adapting a generic crate's API to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::core::error::ErrorKind;

/// The three independent route classes subject to rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Consensus,
    Batch,
    ReadOnly,
}

/// Per-class defaults: `(capacity, refill interval)` — 60/min, 12/min,
/// 300/min respectively.
fn defaults(class: RouteClass) -> (u32, Duration) {
    match class {
        RouteClass::Consensus => (60, Duration::from_secs(60)),
        RouteClass::Batch => (12, Duration::from_secs(60)),
        RouteClass::ReadOnly => (300, Duration::from_secs(60)),
    }
}

struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_interval: Duration,
    refill_rate_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_interval,
            refill_rate_per_sec: capacity as f64 / refill_interval.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(self.capacity as f64);
            self.last_refill = now;
        }
    }

    /// Attempt to take one token. Returns the retry-after hint on exhaustion.
    fn try_take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let seconds_to_one_token = (1.0 - self.tokens) / self.refill_rate_per_sec;
            Err(Duration::from_secs_f64(seconds_to_one_token).max(Duration::from_secs(1)))
        }
    }
}

/// Token-bucket rate limiter keyed by `(token, route_class)`, with
/// per-key bucket state guarded by a single shared lock.
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, RouteClass), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consult and decrement the bucket for `(token, class)`.
    pub async fn check(&self, token: &str, class: RouteClass) -> Result<(), ErrorKind> {
        let mut buckets = self.buckets.lock().await;
        let key = (token.to_string(), class);
        let (capacity, interval) = defaults(class);
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(capacity, interval));

        bucket
            .try_take()
            .map_err(|retry_after| ErrorKind::RateLimited {
                retry_after: retry_after.as_secs().max(1),
            })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Auth gate: validates the `Authorization: Bearer <token>` header against
/// the configured token set.
pub struct AuthGate {
    tokens: Arc<Vec<String>>,
}

impl AuthGate {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }

    /// Parse and validate a raw `Authorization` header value, returning the
    /// bearer token on success.
    pub fn authorize<'a>(&self, header: Option<&'a str>) -> Result<&'a str, ErrorKind> {
        let header = header.ok_or_else(|| ErrorKind::Unauthorized("missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ErrorKind::Unauthorized("malformed Authorization header".to_string()))?
            .trim();

        if token.is_empty() {
            return Err(ErrorKind::Unauthorized("empty bearer token".to_string()));
        }

        if self.tokens.iter().any(|t| t == token) {
            Ok(token)
        } else {
            Err(ErrorKind::Forbidden("token not recognized".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_bucket_reports_retry_after() {
        let limiter = RateLimiter::new();
        for _ in 0..60 {
            assert!(limiter.check("tok", RouteClass::Consensus).await.is_ok());
        }
        let err = limiter.check("tok", RouteClass::Consensus).await.unwrap_err();
        assert!(matches!(err, ErrorKind::RateLimited { retry_after } if retry_after >= 1));
    }

    #[tokio::test]
    async fn route_classes_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..60 {
            limiter.check("tok", RouteClass::Consensus).await.unwrap();
        }
        assert!(limiter.check("tok", RouteClass::ReadOnly).await.is_ok());
    }

    #[tokio::test]
    async fn tokens_are_independent_per_caller() {
        let limiter = RateLimiter::new();
        for _ in 0..60 {
            limiter.check("tok-a", RouteClass::Consensus).await.unwrap();
        }
        assert!(limiter.check("tok-b", RouteClass::Consensus).await.is_ok());
    }

    #[test]
    fn auth_gate_accepts_known_bearer_token() {
        let gate = AuthGate::new(vec!["secret1".to_string()]);
        assert_eq!(gate.authorize(Some("Bearer secret1")).unwrap(), "secret1");
    }

    #[test]
    fn auth_gate_rejects_missing_header() {
        let gate = AuthGate::new(vec!["secret1".to_string()]);
        assert!(matches!(gate.authorize(None), Err(ErrorKind::Unauthorized(_))));
    }

    #[test]
    fn auth_gate_rejects_malformed_header() {
        let gate = AuthGate::new(vec!["secret1".to_string()]);
        assert!(matches!(
            gate.authorize(Some("Basic xyz")),
            Err(ErrorKind::Unauthorized(_))
        ));
    }

    #[test]
    fn auth_gate_rejects_unknown_token() {
        let gate = AuthGate::new(vec!["secret1".to_string()]);
        assert!(matches!(
            gate.authorize(Some("Bearer unknown")),
            Err(ErrorKind::Forbidden(_))
        ));
    }
}
