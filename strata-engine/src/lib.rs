//! Strata Engine - Context Resolution for LLM Assistants
//!
//! Wires the history graph, summarizer, compiler, adaptive gate and quality
//! critic into one [`ContextEngine`] per conversation.
//!
//! ```ignore
//! let mut engine = ContextEngine::offline(EngineConfig::default())?;
//! engine.add_interaction(NewNode::user("How are tokens rotated?")).await?;
//! let context = engine.retrieve_context(&ContextRequest::new("token rotation")).await;
//! println!("{}", context.render());
//! ```

mod engine;
pub mod telemetry;

pub use engine::{
    ContextEngine, ContextRequest, EngineConfig, RetrievedContext, DEFAULT_RETRIEVAL_TYPE,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use strata_context::{CompileOptions, ContextWindow};
pub use strata_core::{
    ChunkFeedback, ContextChunk, NodeId, ResolutionConfig, ResolutionTier, StrataError,
    StrataResult, TaskType,
};
pub use strata_critic::ContextCritique;
pub use strata_gate::{ChunkLimits, GateReport};
pub use strata_graph::{HistoryGraph, NewNode};
pub use strata_llm::ServiceRegistry;
pub use strata_summarizer::SummarizationReport;
