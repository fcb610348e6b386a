//! Offline summarization service
//!
//! Truncates and prefixes content. Drop-in for hosts without a model.

use crate::cost::CostTracker;
use crate::service::{SummarizationService, SummaryResult};
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::{estimate_tokens, truncate_to_token_budget, StrataResult};

/// Quality the mock reports for every summary.
const MOCK_QUALITY: f32 = 0.8;

/// Truncate-and-prefix summarizer.
#[derive(Debug, Clone)]
pub struct MockSummarizationService {
    prefix: String,
    /// Cost per 1,000 tokens processed (input plus output)
    cost_per_1k_tokens: f64,
    tracker: Option<Arc<CostTracker>>,
}

impl MockSummarizationService {
    pub fn new() -> Self {
        Self {
            prefix: "Summary: ".to_string(),
            cost_per_1k_tokens: 0.0,
            tracker: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Charge a simulated price so budget checks can be exercised offline.
    pub fn with_cost_per_1k_tokens(mut self, cost: f64) -> Self {
        self.cost_per_1k_tokens = cost.max(0.0);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn price(&self, tokens: i64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }

    fn summarize_one(
        &self,
        content: &str,
        max_tokens: i32,
        preserve_code: bool,
        preserve_decisions: bool,
    ) -> String {
        let budget = (max_tokens - estimate_tokens(&self.prefix)).max(1);
        let kept = key_lines(content, preserve_code, preserve_decisions);
        let kept_tokens = estimate_tokens(&kept);

        let body = if !kept.is_empty() && kept_tokens < budget {
            let head = truncate_to_token_budget(content, budget - kept_tokens);
            if head.contains(&kept) {
                head
            } else {
                format!("{}\n{}", head, kept)
            }
        } else {
            truncate_to_token_budget(content, budget)
        };
        format!("{}{}", self.prefix, body)
    }
}

impl Default for MockSummarizationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Lines worth keeping verbatim: code signatures and stated decisions.
fn key_lines(content: &str, preserve_code: bool, preserve_decisions: bool) -> String {
    let mut kept = Vec::new();
    for line in content.lines().map(str::trim) {
        let lower = line.to_lowercase();
        let is_signature = preserve_code
            && ["fn ", "def ", "class ", "struct ", "function "]
                .iter()
                .any(|kw| lower.starts_with(kw) || lower.starts_with(&format!("pub {}", kw)));
        let is_decision = preserve_decisions
            && ["decided", "decision:", "we will", "chose "]
                .iter()
                .any(|kw| lower.contains(kw));
        if is_signature || is_decision {
            kept.push(line);
        }
    }
    kept.join("\n")
}

#[async_trait]
impl SummarizationService for MockSummarizationService {
    async fn summarize_batch(
        &self,
        contents: &[String],
        max_tokens: i32,
        preserve_code: bool,
        preserve_decisions: bool,
    ) -> StrataResult<Vec<SummaryResult>> {
        let results = contents
            .iter()
            .map(|content| {
                let summary =
                    self.summarize_one(content, max_tokens, preserve_code, preserve_decisions);
                let input = estimate_tokens(content) as i64;
                let output = estimate_tokens(&summary);
                let cost = self.price(input + output as i64);
                if let Some(tracker) = &self.tracker {
                    tracker.record_summarization(input, output as i64, cost);
                }
                SummaryResult {
                    summary,
                    token_count: output,
                    quality_score: MOCK_QUALITY,
                    cost,
                }
            })
            .collect();
        Ok(results)
    }

    fn estimate_cost(&self, node_count: usize, avg_content_length: usize, max_tokens: i32) -> f64 {
        let per_item = avg_content_length.div_ceil(4) as i64 + max_tokens.max(0) as i64;
        self.price(per_item * node_count as i64)
    }

    fn service_id(&self) -> &str {
        "mock"
    }
}
