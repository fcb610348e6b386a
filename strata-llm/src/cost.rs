//! Usage and spend tracking

use std::sync::atomic::{AtomicI64, Ordering};

/// Micro-units per currency unit for the atomic spend counter.
const MICROS: f64 = 1_000_000.0;

/// Tracks service usage and spend.
/// Thread-safe via atomic operations.
pub struct CostTracker {
    summarization_requests: AtomicI64,
    input_tokens: AtomicI64,
    output_tokens: AtomicI64,
    /// Spend in millionths
    spend_micros: AtomicI64,
    retrieval_requests: AtomicI64,
    judge_requests: AtomicI64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            summarization_requests: AtomicI64::new(0),
            input_tokens: AtomicI64::new(0),
            output_tokens: AtomicI64::new(0),
            spend_micros: AtomicI64::new(0),
            retrieval_requests: AtomicI64::new(0),
            judge_requests: AtomicI64::new(0),
        }
    }

    /// Record one summarization request.
    pub fn record_summarization(&self, input_tokens: i64, output_tokens: i64, cost: f64) {
        self.summarization_requests.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        self.spend_micros
            .fetch_add((cost.max(0.0) * MICROS).round() as i64, Ordering::Relaxed);
    }

    pub fn record_retrieval(&self) {
        self.retrieval_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_judge(&self) {
        self.judge_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summarization_requests(&self) -> i64 {
        self.summarization_requests.load(Ordering::Relaxed)
    }

    pub fn input_tokens(&self) -> i64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> i64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    pub fn total_spend(&self) -> f64 {
        self.spend_micros.load(Ordering::Relaxed) as f64 / MICROS
    }

    pub fn retrieval_requests(&self) -> i64 {
        self.retrieval_requests.load(Ordering::Relaxed)
    }

    pub fn judge_requests(&self) -> i64 {
        self.judge_requests.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.summarization_requests,
            &self.input_tokens,
            &self.output_tokens,
            &self.spend_micros,
            &self.retrieval_requests,
            &self.judge_requests,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("summarization_requests", &self.summarization_requests())
            .field("input_tokens", &self.input_tokens())
            .field("output_tokens", &self.output_tokens())
            .field("total_spend", &self.total_spend())
            .field("retrieval_requests", &self.retrieval_requests())
            .field("judge_requests", &self.judge_requests())
            .finish()
    }
}
