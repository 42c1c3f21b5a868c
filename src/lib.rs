//! consensus-gateway: multi-model LLM consensus engine.
//!
//! Fans a question out to several independent LLM providers concurrently,
//! scores their replies for pairwise agreement, optionally runs a
//! chain-of-thought critique-and-revise loop, and returns one consensus
//! answer alongside per-model metadata.

pub mod analytics;
pub mod cache;
pub mod consensus;
pub mod core;
pub mod embedding;
pub mod http;
pub mod models;
pub mod providers;
pub mod ratelimit;

pub use core::config::AppConfig;
pub use core::error::{ConfigError, ErrorKind};
