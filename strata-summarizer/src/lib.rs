//! Strata Summarizer - History Compression
//!
//! Decides which history nodes are far enough from the conversation head to
//! be compressed, checks the estimated cost against a daily budget, and
//! stores service-produced summaries back into the graph. Community rollups
//! and a debounced background pass build on the same pieces.

mod background;
mod summarizer;

pub use background::BackgroundSummarizer;
pub use summarizer::{
    SummarizationPlan, SummarizationReport, Summarizer, SummarizerStats, SummaryCandidate,
    SummaryOutcome, FALLBACK_QUALITY,
};
