//! Strata Critic - Context Quality Scoring
//!
//! Scores how well a set of retrieved chunks serves a query, lists context
//! that appears to be missing, and turns the verdict into feedback for the
//! adaptive gate.

mod blindspots;
mod critic;
mod terms;

pub use critic::{ContextCritique, CritiqueHistory, CritiqueMetrics, QualityCritic, NOISE_RELEVANCE};
pub use terms::{query_terms, term_overlap};
