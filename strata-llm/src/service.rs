//! External service traits
//!
//! Summarization, retrieval and relevance judging are supplied by the host.
//! Each trait is object-safe and async so implementations can call out to
//! remote models; the engine only ever holds `Arc<dyn Trait>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::{EmbeddingVector, RetrievalResult, StrataResult, TaskType};

// ============================================================================
// SUMMARIZATION
// ============================================================================

/// One summarization output, parallel to the request's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    pub token_count: i32,
    /// Self-reported quality in [0, 1]
    pub quality_score: f32,
    pub cost: f64,
}

/// Compresses history content.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    /// Summarize each content string, returning one result per input in
    /// the same order.
    async fn summarize_batch(
        &self,
        contents: &[String],
        max_tokens: i32,
        preserve_code: bool,
        preserve_decisions: bool,
    ) -> StrataResult<Vec<SummaryResult>>;

    /// Estimated cost of summarizing `node_count` items of
    /// `avg_content_length` characters each.
    fn estimate_cost(&self, node_count: usize, avg_content_length: usize, max_tokens: i32) -> f64;

    /// Identifier used in logs.
    fn service_id(&self) -> &str {
        "summarizer"
    }
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// Metadata equality filters passed through to a retrieval backend.
pub type SearchFilters = HashMap<String, serde_json::Value>;

/// Semantic search over an external knowledge base.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Top `k` chunks for a query, most similar first.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> StrataResult<Vec<RetrievalResult>>;

    /// Embed text for similarity refinement. Backends without an embedding
    /// endpoint return `None`.
    async fn embed(&self, _text: &str) -> StrataResult<Option<EmbeddingVector>> {
        Ok(None)
    }
}

// ============================================================================
// JUDGE
// ============================================================================

/// Optional model-backed relevance judge.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Relevance of `content` to `query` in [0, 1].
    async fn score_relevance(&self, content: &str, query: &str, task_type: TaskType)
        -> StrataResult<f32>;

    /// Short descriptions of context that appears to be missing.
    async fn list_blindspots(
        &self,
        query: &str,
        context: &str,
        task_type: TaskType,
    ) -> StrataResult<Vec<String>>;
}
