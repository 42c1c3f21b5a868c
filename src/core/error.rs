//! Unified error vocabulary for the consensus gateway.
//!
//! Every component communicates failures through [`ErrorKind`]; only the
//! request router translates a kind into an HTTP status and the
//! `{error_code, message, details, timestamp}` envelope. Internal
//! components never format transport-layer responses themselves.

use thiserror::Error;

/// The closed set of error kinds surfaced as `error_code` at the HTTP boundary.
///
/// Kept deliberately flat (no nested `anyhow::Error` payloads) so that every
/// call site can pattern-match on the kind instead of parsing message text.
#[derive(Error, Debug, Clone)]
pub enum ErrorKind {
    /// Request failed validation (missing fields, out-of-range values).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `Authorization` header missing or malformed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Bearer token not present in the configured token set.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Token bucket exhausted; `retry_after` is the bucket refill interval in seconds.
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited {
        /// Seconds until the next token is available.
        retry_after: u64,
    },

    /// A single provider call exceeded its slice of the request deadline.
    #[error("provider {model_id} timed out")]
    ProviderTimeout {
        /// The model that timed out.
        model_id: String,
    },

    /// A provider returned an HTTP error. `transient` mirrors a 5xx/connection
    /// failure (retryable); non-transient mirrors a 4xx (final).
    #[error("provider {model_id} http error {status}")]
    ProviderHttpError {
        /// The model that failed.
        model_id: String,
        /// HTTP status code returned by the provider, 0 if the connection failed outright.
        status: u16,
        /// Whether this error is eligible for a retry within the shared deadline.
        transient: bool,
    },

    /// A provider's response body could not be parsed into the canonical reply shape.
    #[error("provider {model_id} returned an unparsable response")]
    ProviderParseError {
        /// The model whose response failed to parse.
        model_id: String,
    },

    /// The client disconnected or the request was otherwise cancelled.
    #[error("request canceled")]
    Canceled,

    /// The request-wide deadline elapsed before enough providers replied.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Fewer than `min_success` provider calls succeeded.
    #[error("consensus failed: fewer than {min_success} providers succeeded ({succeeded} did)")]
    ConsensusFailed {
        /// The configured minimum number of successes required.
        min_success: usize,
        /// The number of providers that actually succeeded.
        succeeded: usize,
    },

    /// `max_inflight_requests` has been reached.
    #[error("server overloaded")]
    Overloaded,

    /// Anything unexpected; carries a human-readable message for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// The stable `error_code` string used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest(_) => "invalid_request",
            ErrorKind::Unauthorized(_) => "unauthorized",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::ProviderTimeout { .. } => "provider_timeout",
            ErrorKind::ProviderHttpError { .. } => "provider_http_error",
            ErrorKind::ProviderParseError { .. } => "provider_parse_error",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::ConsensusFailed { .. } => "consensus_failed",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Internal(_) => "internal_error",
        }
    }

    /// The HTTP status this kind maps to at the router boundary.
    ///
    /// Per-model kinds (`provider_timeout`, `provider_http_error`,
    /// `provider_parse_error`) never reach this mapping directly — they are
    /// recorded on individual `ProviderReply` entries and only escalate to a
    /// request-level status via `ConsensusFailed` or `DeadlineExceeded`.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest(_) => 400,
            ErrorKind::Unauthorized(_) => 401,
            ErrorKind::Forbidden(_) => 403,
            ErrorKind::RateLimited { .. } => 429,
            ErrorKind::ProviderTimeout { .. } => 500,
            ErrorKind::ProviderHttpError { .. } => 500,
            ErrorKind::ProviderParseError { .. } => 500,
            ErrorKind::Canceled => 499,
            ErrorKind::DeadlineExceeded => 408,
            ErrorKind::ConsensusFailed { .. } => 422,
            ErrorKind::Overloaded => 503,
            ErrorKind::Internal(_) => 500,
        }
    }

    /// Whether retrying the same call within the remaining budget has a
    /// non-trivial chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited { .. }
                | ErrorKind::ProviderTimeout { .. }
                | ErrorKind::ProviderHttpError { transient: true, .. }
        )
    }
}

/// Startup-only configuration failures; the process exits with code 1
/// when one of these surfaces.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable was missing or empty.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// The model-descriptor file could not be read or parsed.
    #[error("failed to load model descriptor file {path}: {message}")]
    DescriptorLoad {
        /// Path to the descriptor file.
        path: String,
        /// Underlying parse/IO error message.
        message: String,
    },

    /// The descriptor file declared a duplicate model id.
    #[error("duplicate model id in descriptor file: {0}")]
    DuplicateModelId(String),

    /// `default_models` referenced an id not present in `models`.
    #[error("default_models references unknown model id: {0}")]
    UnknownDefaultModel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_timeout_is_transient() {
        assert!(ErrorKind::ProviderTimeout { model_id: "m1".to_string() }.is_transient());
    }

    #[test]
    fn non_transient_http_error_is_not_retried() {
        assert!(!ErrorKind::ProviderHttpError {
            model_id: "m1".to_string(),
            status: 400,
            transient: false,
        }
        .is_transient());
    }

    #[test]
    fn rate_limited_is_transient() {
        assert!(ErrorKind::RateLimited { retry_after: 1 }.is_transient());
    }

    #[test]
    fn invalid_request_is_not_transient() {
        assert!(!ErrorKind::InvalidRequest("bad".to_string()).is_transient());
    }
}
