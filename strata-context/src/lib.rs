//! Strata Context - Context Compilation
//!
//! Resolution strategies decide how much of each history node to keep; the
//! compiler combines them under a token budget into a [`ContextWindow`].

mod compiler;
mod strategy;
mod window;

pub use compiler::{CompileOptions, ContextCompiler, ContextSizeEstimate};
pub use strategy::{
    rendered_cost, tier_for_distance, CheckpointAware, DistanceBased, FocusStrategy, ImportanceBased,
    ResolutionStrategy, TokenBudgetStrategy,
};
pub use window::{ContextWindow, ResolutionDecision, WindowMetrics};
