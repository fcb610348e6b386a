//! Rolling statistics for one retrieval type

use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strata_core::{bound_threshold, ChunkFeedback, GateConfig};

/// Lower and upper percentile clamp for the percentile estimate.
const PERCENTILE_FLOOR: f32 = 10.0;
const PERCENTILE_CEIL: f32 = 90.0;

/// Multiplier applied to the base threshold when context was missing.
const MISSING_CONTEXT_FACTOR: f32 = 0.95;
/// Multiplier applied when too many chunks were unnecessary.
const UNNECESSARY_FACTOR: f32 = 1.05;
/// Unnecessary-chunk share above which the base threshold rises.
const UNNECESSARY_RATIO_LIMIT: f32 = 0.3;

/// Adaptive state for one (project, retrieval type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingStatistics {
    /// Raw similarity scores, oldest first
    pub scores: VecDeque<f32>,
    /// Included / total per batch
    pub inclusion_rates: VecDeque<f32>,
    /// Precision per feedback event
    pub quality_scores: VecDeque<f32>,
    /// 1.0 unless the event reported missing context
    pub recall_signals: VecDeque<f32>,

    pub current_threshold: f32,
    pub base_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,

    pub mean: f32,
    pub median: f32,
    pub std_dev: f32,
    pub mad: f32,

    /// Rolling precision once enough feedback exists
    pub precision: Option<f32>,
    pub recall: Option<f32>,

    pub total_batches: u64,
    pub total_scored: u64,
    pub total_included: u64,
    pub total_feedback: u64,
}

impl GatingStatistics {
    pub fn new(config: &GateConfig) -> Self {
        let base = bound_threshold(config.base_threshold, config.min_threshold, config.max_threshold);
        Self {
            scores: VecDeque::new(),
            inclusion_rates: VecDeque::new(),
            quality_scores: VecDeque::new(),
            recall_signals: VecDeque::new(),
            current_threshold: base,
            base_threshold: base,
            min_threshold: config.min_threshold,
            max_threshold: config.max_threshold,
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            mad: 0.0,
            precision: None,
            recall: None,
            total_batches: 0,
            total_scored: 0,
            total_included: 0,
            total_feedback: 0,
        }
    }

    /// Whether enough scores exist for the threshold to adapt.
    pub fn has_history(&self, config: &GateConfig) -> bool {
        self.scores.len() >= config.min_history
    }

    /// Add a batch of scores and re-estimate the threshold.
    ///
    /// Until `min_history` scores exist the base threshold is used as is.
    /// Returns the threshold to apply to this batch.
    pub fn observe(&mut self, batch: &[f32], target_chunks: usize, config: &GateConfig) -> f32 {
        for score in batch {
            push_bounded(&mut self.scores, *score, config.score_window);
        }
        self.total_scored += batch.len() as u64;

        let window: Vec<f32> = self.scores.iter().copied().collect();
        self.mean = stats::mean(&window);
        self.median = stats::median(&window);
        self.std_dev = stats::std_dev(&window);
        self.mad = stats::mad(&window);

        if !self.has_history(config) {
            self.current_threshold = self.base_threshold;
            return self.current_threshold;
        }

        let percentile_estimate = self.percentile_estimate(&window, target_chunks, batch.len());
        let statistical_estimate = stats::statistical_threshold(&window, config.outlier_method);
        let quality_estimate = self.quality_estimate(config);

        let combined = config.percentile_weight * percentile_estimate
            + config.statistical_weight * statistical_estimate
            + config.quality_weight * quality_estimate;
        let rate = config.adaptation_rate;
        let smoothed = (1.0 - rate) * self.current_threshold + rate * combined;

        self.current_threshold = if smoothed.is_finite() {
            bound_threshold(smoothed, self.min_threshold, self.max_threshold)
        } else {
            self.base_threshold
        };
        tracing::debug!(
            percentile_estimate,
            statistical_estimate,
            quality_estimate,
            threshold = self.current_threshold,
            "Adapted gate threshold"
        );
        self.current_threshold
    }

    /// Score at the percentile that would keep `target_chunks` of a batch.
    fn percentile_estimate(&self, window: &[f32], target_chunks: usize, batch_len: usize) -> f32 {
        let keep = if batch_len == 0 {
            0.0
        } else {
            target_chunks as f32 / batch_len as f32
        };
        let p = ((1.0 - keep) * 100.0).clamp(PERCENTILE_FLOOR, PERCENTILE_CEIL);
        stats::percentile(window, p)
    }

    fn quality_estimate(&self, config: &GateConfig) -> f32 {
        match (self.precision, self.recall) {
            (Some(p), _) if p < config.target_precision => {
                self.current_threshold + config.quality_step
            }
            (_, Some(r)) if r < config.target_recall => self.current_threshold - config.quality_step,
            _ => self.current_threshold,
        }
    }

    /// Record how many of a batch got through.
    pub fn record_inclusion(&mut self, included: usize, total: usize, config: &GateConfig) {
        self.total_batches += 1;
        self.total_included += included as u64;
        if total > 0 {
            push_bounded(
                &mut self.inclusion_rates,
                included as f32 / total as f32,
                config.quality_window,
            );
        }
    }

    /// Mean inclusion rate over the window.
    pub fn inclusion_rate(&self) -> Option<f32> {
        if self.inclusion_rates.is_empty() {
            return None;
        }
        let rates: Vec<f32> = self.inclusion_rates.iter().copied().collect();
        Some(stats::mean(&rates))
    }

    /// Fold one feedback event into precision, recall and the base
    /// threshold.
    pub fn apply_feedback(&mut self, feedback: &ChunkFeedback, config: &GateConfig) {
        self.total_feedback += 1;

        if let Some(precision) = feedback.precision() {
            push_bounded(&mut self.quality_scores, precision, config.quality_window);
            if self.quality_scores.len() >= config.min_quality_samples {
                let window: Vec<f32> = self.quality_scores.iter().copied().collect();
                self.precision = Some(stats::mean(&window));
            }
        }

        let missing = feedback.reports_missing_context();
        let signal = if missing { 0.0 } else { 1.0 };
        push_bounded(&mut self.recall_signals, signal, config.quality_window);
        if self.recall_signals.len() >= config.min_quality_samples {
            let window: Vec<f32> = self.recall_signals.iter().copied().collect();
            self.recall = Some(stats::mean(&window));
        }

        if missing {
            self.base_threshold = (self.base_threshold * MISSING_CONTEXT_FACTOR).max(self.min_threshold);
        }
        if feedback.unnecessary_ratio() > UNNECESSARY_RATIO_LIMIT {
            self.base_threshold = (self.base_threshold * UNNECESSARY_FACTOR).min(self.max_threshold);
        }
        self.current_threshold =
            bound_threshold(self.current_threshold, self.min_threshold, self.max_threshold);
    }

    /// Adopt the bounds of `config`, pulling both thresholds inside them.
    ///
    /// Persisted statistics carry the bounds they were saved with.
    pub fn rebound(&mut self, config: &GateConfig) {
        self.min_threshold = config.min_threshold;
        self.max_threshold = config.max_threshold;
        self.base_threshold = bound_threshold(self.base_threshold, self.min_threshold, self.max_threshold);
        self.current_threshold =
            bound_threshold(self.current_threshold, self.min_threshold, self.max_threshold);
    }
}

fn push_bounded(window: &mut VecDeque<f32>, value: f32, limit: usize) {
    window.push_back(value);
    while window.len() > limit.max(1) {
        window.pop_front();
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Observe(Vec<f32>, usize),
        Feedback(Vec<bool>, bool, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (prop::collection::vec(-0.5f32..1.5, 0..30), 0usize..20)
                .prop_map(|(s, t)| Op::Observe(s, t)),
            (prop::collection::vec(any::<bool>(), 0..10), any::<bool>(), 0usize..10)
                .prop_map(|(u, m, n)| Op::Feedback(u, m, n)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_threshold_stays_in_bounds(ops in prop::collection::vec(op(), 1..60)) {
            let config = GateConfig::default();
            let mut stats = GatingStatistics::new(&config);
            for op in ops {
                match op {
                    Op::Observe(scores, target) => {
                        stats.observe(&scores, target, &config);
                    }
                    Op::Feedback(useful, missing, unnecessary) => {
                        let ids: Vec<String> = (0..useful.len()).map(|i| i.to_string()).collect();
                        let feedback = ChunkFeedback {
                            unnecessary_chunk_ids: ids.iter().take(unnecessary).cloned().collect(),
                            chunk_ids: ids,
                            useful,
                            missing_context: missing.then(|| "missing".to_string()),
                        };
                        stats.apply_feedback(&feedback, &config);
                    }
                }
                prop_assert!(stats.current_threshold >= config.min_threshold);
                prop_assert!(stats.current_threshold <= config.max_threshold);
                prop_assert!(stats.base_threshold >= config.min_threshold);
                prop_assert!(stats.base_threshold <= config.max_threshold);
            }
        }
    }
}
