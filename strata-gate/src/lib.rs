//! Strata Gate - Adaptive Retrieval Gating
//!
//! Decides which retrieved chunks are worth spending context on. Each
//! project keeps per-retrieval-type rolling statistics from which a
//! threshold is re-estimated on every batch; feedback about the chunks that
//! got through nudges the threshold toward better precision or recall.

mod gate;
mod profile;
pub mod stats;
mod statistics;

pub use gate::{AdaptiveGate, ChunkLimits, GateDecision, GateReason, GateReport};
pub use profile::{FeedbackEvent, GateRules, GatingProfile, ProfileStore};
pub use statistics::GatingStatistics;
