//! Structured logging setup for the consensus gateway.
//!
//! The service always logs to stdout (it expects to run under a process
//! supervisor or container runtime that captures stdout, not under a
//! desktop shell rotating its own log files). Level is controlled by
//! `RUST_LOG` in the usual `tracing-subscriber` `EnvFilter` syntax, and the
//! output format switches between human-readable and JSON via `LOG_FORMAT`.

use tracing_subscriber::{fmt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored when stdout is a terminal.
    Pretty,
    /// Newline-delimited JSON, one object per log event.
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the global `tracing` subscriber.
///
/// Safe to call once at process start; a second call is a no-op (the
/// underlying `tracing_subscriber::fmt().try_init()` simply errors, which we
/// swallow since tests may initialize logging multiple times across threads).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env() {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).try_init(),
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
