//! Adaptive gate over retrieved chunks
//!
//! Inclusion is decided in one pass over the results in descending score
//! order. The max-chunks cap is checked against the running count of
//! results already included, so a chunk that would pass every other test
//! is still dropped once the cap is reached. The outcome therefore depends
//! on rank, not only on a chunk's own score.

use crate::profile::{CompiledRules, FeedbackEvent, GateRules, GatingProfile, ProfileStore};
use crate::stats;
use crate::statistics::GatingStatistics;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::{ChunkFeedback, GateConfig, RetrievalResult};

// ============================================================================
// REQUEST / REPORT TYPES
// ============================================================================

/// How many chunks a caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLimits {
    /// Desired count, used by the percentile estimate
    pub target: Option<usize>,
    pub min: usize,
    pub max: usize,
}

impl ChunkLimits {
    pub fn new(target: Option<usize>, min: usize, max: usize) -> Self {
        Self {
            target,
            min,
            max: max.max(min),
        }
    }

    /// The gate configuration's defaults.
    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            Some(config.default_target_chunks),
            config.default_min_chunks,
            config.default_max_chunks,
        )
    }
}

/// Why a result was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    IncludedByRule,
    AboveThreshold,
    MinChunks,
    NotOutlier,
    BeforeElbow,
    ExcludedByRule,
    MaxChunksReached,
    BelowThreshold,
}

impl GateReason {
    pub fn is_included(&self) -> bool {
        matches!(
            self,
            Self::IncludedByRule
                | Self::AboveThreshold
                | Self::MinChunks
                | Self::NotOutlier
                | Self::BeforeElbow
        )
    }
}

/// Decision for one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub chunk_id: String,
    pub score: f32,
    /// Position in the ranked list; `None` for rule exclusions
    pub rank: Option<usize>,
    pub outlier: bool,
    pub reason: GateReason,
}

/// Full output of a gating pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    /// Kept results in descending score order
    pub included: Vec<RetrievalResult>,
    pub excluded: Vec<RetrievalResult>,
    pub decisions: Vec<GateDecision>,
    pub threshold: f32,
    pub elbow: Option<usize>,
    /// The threshold came from adapted history rather than the base value
    pub adapted: bool,
}

// ============================================================================
// GATE
// ============================================================================

/// Learns per-project thresholds for accepting retrieved chunks.
///
/// Profiles are loaded lazily from the store and written back after every
/// call that changes them. Store failures are logged and the gate continues
/// with in-memory state.
#[derive(Debug)]
pub struct AdaptiveGate {
    config: GateConfig,
    store: ProfileStore,
    profiles: HashMap<String, GatingProfile>,
}

impl AdaptiveGate {
    pub fn new(config: GateConfig, store: ProfileStore) -> Self {
        Self {
            config,
            store,
            profiles: HashMap::new(),
        }
    }

    pub fn in_memory(config: GateConfig) -> Self {
        Self::new(config, ProfileStore::in_memory())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// A project's profile, loading or creating it on first use.
    pub fn profile(&mut self, project_id: &str) -> &GatingProfile {
        self.profile_mut(project_id)
    }

    fn profile_mut(&mut self, project_id: &str) -> &mut GatingProfile {
        let store = &self.store;
        let config = &self.config;
        self.profiles
            .entry(project_id.to_string())
            .or_insert_with(|| match store.load(project_id) {
                Ok(Some(mut profile)) => {
                    tracing::debug!(project_id, "Loaded gating profile");
                    profile.rebound(config);
                    profile
                }
                Ok(None) => GatingProfile::new(project_id),
                Err(e) => {
                    tracing::warn!(project_id, error = %e, "Failed to load gating profile, starting fresh");
                    GatingProfile::new(project_id)
                }
            })
    }

    /// Statistics for a project and retrieval type, if any call created them.
    pub fn statistics(&mut self, project_id: &str, retrieval_type: &str) -> Option<&GatingStatistics> {
        self.profile_mut(project_id).statistics.get(retrieval_type)
    }

    /// Threshold the next batch would start from.
    pub fn current_threshold(&mut self, project_id: &str, retrieval_type: &str) -> f32 {
        let config = self.config.clone();
        self.profile_mut(project_id)
            .statistics_mut(retrieval_type, &config)
            .current_threshold
    }

    /// Replace a project's rule lists.
    pub fn set_rules(&mut self, project_id: &str, rules: GateRules) {
        let profile = self.profile_mut(project_id);
        profile.rules = rules;
        profile.updated_at = Utc::now();
        self.persist(project_id);
    }

    /// Kept results, best first.
    pub fn filter_results(
        &mut self,
        results: Vec<RetrievalResult>,
        project_id: &str,
        retrieval_type: &str,
        limits: ChunkLimits,
    ) -> Vec<RetrievalResult> {
        self.filter_results_with_report(results, project_id, retrieval_type, limits)
            .included
    }

    /// Gate a batch and explain every decision.
    pub fn filter_results_with_report(
        &mut self,
        results: Vec<RetrievalResult>,
        project_id: &str,
        retrieval_type: &str,
        limits: ChunkLimits,
    ) -> GateReport {
        let config = self.config.clone();
        let profile = self.profile_mut(project_id);
        let rules = profile.rules.compile();

        let mut report = GateReport::default();
        let mut ranked = Vec::with_capacity(results.len());
        for result in results {
            if rules.excludes(&result.content) {
                report.decisions.push(GateDecision {
                    chunk_id: result.chunk_id.clone(),
                    score: score_of(&result),
                    rank: None,
                    outlier: false,
                    reason: GateReason::ExcludedByRule,
                });
                report.excluded.push(result);
            } else {
                ranked.push(result);
            }
        }
        ranked.sort_by(|a, b| score_of(b).total_cmp(&score_of(a)));

        let scores: Vec<f32> = ranked.iter().map(score_of).collect();
        let target = limits.target.unwrap_or(config.default_target_chunks);
        let statistics = profile.statistics_mut(retrieval_type, &config);
        report.threshold = statistics.observe(&scores, target, &config);
        report.adapted = statistics.has_history(&config);
        report.elbow = stats::find_elbow(&scores);
        let outliers = stats::outlier_flags(&scores, config.outlier_method);

        let total = ranked.len();
        for (rank, result) in ranked.into_iter().enumerate() {
            let reason = decide(
                rank,
                &result,
                outliers[rank],
                &report,
                &limits,
                &rules,
            );
            report.decisions.push(GateDecision {
                chunk_id: result.chunk_id.clone(),
                score: scores[rank],
                rank: Some(rank),
                outlier: outliers[rank],
                reason,
            });
            if reason.is_included() {
                report.included.push(result);
            } else {
                report.excluded.push(result);
            }
        }

        statistics.record_inclusion(report.included.len(), total, &config);
        profile.total_filtered += 1;
        profile.updated_at = Utc::now();
        tracing::debug!(
            project_id,
            retrieval_type,
            threshold = report.threshold,
            included = report.included.len(),
            excluded = report.excluded.len(),
            elbow = ?report.elbow,
            "Gated retrieval results"
        );

        self.persist(project_id);
        report
    }

    /// Fold feedback about included chunks into the project's statistics.
    pub fn record_feedback(&mut self, project_id: &str, retrieval_type: &str, feedback: &ChunkFeedback) {
        let config = self.config.clone();
        let profile = self.profile_mut(project_id);
        let statistics = profile.statistics_mut(retrieval_type, &config);
        statistics.apply_feedback(feedback, &config);
        let base_threshold = statistics.base_threshold;

        profile.feedback_history.push(FeedbackEvent {
            retrieval_type: retrieval_type.to_string(),
            recorded_at: Utc::now(),
            feedback: feedback.clone(),
            precision: feedback.precision(),
            base_threshold,
        });
        profile.total_feedback += 1;
        profile.updated_at = Utc::now();
        tracing::debug!(
            project_id,
            retrieval_type,
            base_threshold,
            missing_context = feedback.reports_missing_context(),
            "Recorded gate feedback"
        );

        self.persist(project_id);
    }

    fn persist(&mut self, project_id: &str) {
        let limit = self.config.feedback_history_limit;
        let Some(profile) = self.profiles.get_mut(project_id) else {
            return;
        };
        profile.trim_history(limit);
        if let Err(e) = self.store.save(profile) {
            tracing::warn!(project_id, error = %e, "Failed to persist gating profile");
        }
    }
}

/// Single-pass inclusion test for the result at `rank`.
fn decide(
    rank: usize,
    result: &RetrievalResult,
    outlier: bool,
    report: &GateReport,
    limits: &ChunkLimits,
    rules: &CompiledRules,
) -> GateReason {
    if report.included.len() >= limits.max {
        return GateReason::MaxChunksReached;
    }
    if rules.includes(&result.content) {
        return GateReason::IncludedByRule;
    }
    if score_of(result) >= report.threshold {
        return GateReason::AboveThreshold;
    }
    if rank < limits.min {
        return GateReason::MinChunks;
    }
    if !outlier {
        return GateReason::NotOutlier;
    }
    if report.elbow.is_some_and(|elbow| rank < elbow) {
        return GateReason::BeforeElbow;
    }
    GateReason::BelowThreshold
}

/// Non-finite similarities rank last.
fn score_of(result: &RetrievalResult) -> f32 {
    if result.similarity.is_finite() {
        result.similarity
    } else {
        0.0
    }
}
