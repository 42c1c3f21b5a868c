//! Consensus engine: fan-out, scoring, and chain refinement orchestration,
//! plus its supporting fingerprinting, prompt rendering, and
//! agreement-scoring modules.

pub mod cancellation;
pub mod engine;
pub mod fingerprint;
pub mod prompts;
pub mod scoring;
pub mod types;

pub use engine::{ConsensusEngine, EngineDeps};
pub use types::{
    ChainRound, ConsensusMethod, ConsensusRequest, ConsensusResult, ModelReply,
    QueryAnalyticsRecord, ReasoningMethod,
};
