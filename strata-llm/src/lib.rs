//! Strata LLM - External Service Abstractions
//!
//! Traits for the summarization, retrieval and judge services the engine
//! consumes, plus offline implementations that need no network access.

mod cost;
mod mock;
mod registry;
mod retrieval;
mod service;

pub use cost::CostTracker;
pub use mock::MockSummarizationService;
pub use registry::ServiceRegistry;
pub use retrieval::{HashEmbedder, InMemoryRetrievalService};
pub use service::{Judge, RetrievalService, SearchFilters, SummarizationService, SummaryResult};
