//! Configuration types
//!
//! `ResolutionConfig` drives graph resolution, the compiler budget and the
//! summarizer. `GateConfig` drives the adaptive retrieval gate; its threshold
//! bounds come from the resolution config.

use crate::{ConfigError, OutlierMethod, StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// RESOLUTION CONFIG
// ============================================================================

/// Resolution, budget and summarization settings.
///
/// Distances are graph-edge counts measured from the current node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Nodes closer than this are kept at full detail
    pub full_context_distance: usize,
    /// Nodes up to this distance are kept as summaries
    pub summary_distance: usize,
    /// Nodes up to this distance are kept as titles
    pub title_distance: usize,

    /// Token ceiling requested from the summarization service
    pub max_summary_tokens: i32,
    /// Fixed token cost of a title line
    pub max_title_tokens: i32,
    /// Token budget for a compiled window
    pub target_context_size: i32,
    /// Token cost assumed for a summary-tier node without a summary
    pub default_summary_tokens: i32,
    /// Token cost assumed for a community without a measurable summary
    pub default_community_tokens: i32,

    /// Importance at or above which a node is treated as important
    pub importance_threshold: f32,

    // Summarizer
    /// Number of nodes sent per summarization request
    pub summary_batch_size: usize,
    /// Maximum summarization spend per day
    pub daily_budget: f64,
    /// Summaries scored below this are discarded
    pub min_summary_quality: f32,
    pub preserve_code: bool,
    pub preserve_decisions: bool,
    /// Debounce delay before a background summarization pass runs
    pub summarization_delay_ms: u64,

    // Gate bounds
    pub min_threshold: f32,
    pub max_threshold: f32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl ResolutionConfig {
    /// Balanced preset: moderate detail, 8k token window.
    pub fn balanced() -> Self {
        Self {
            full_context_distance: 2,
            summary_distance: 5,
            title_distance: 10,
            max_summary_tokens: 150,
            max_title_tokens: 20,
            target_context_size: 8000,
            default_summary_tokens: 100,
            default_community_tokens: 200,
            importance_threshold: 0.7,
            summary_batch_size: 5,
            daily_budget: 1.0,
            min_summary_quality: 0.5,
            preserve_code: true,
            preserve_decisions: true,
            summarization_delay_ms: 2000,
            min_threshold: 0.3,
            max_threshold: 0.9,
        }
    }

    /// Aggressive preset: compresses early, 4k token window.
    pub fn aggressive() -> Self {
        Self {
            full_context_distance: 1,
            summary_distance: 3,
            title_distance: 6,
            max_summary_tokens: 80,
            max_title_tokens: 12,
            target_context_size: 4000,
            default_summary_tokens: 60,
            default_community_tokens: 120,
            importance_threshold: 0.8,
            ..Self::balanced()
        }
    }

    /// Rich preset: keeps more detail, 16k token window.
    pub fn rich() -> Self {
        Self {
            full_context_distance: 4,
            summary_distance: 10,
            title_distance: 20,
            max_summary_tokens: 300,
            max_title_tokens: 30,
            target_context_size: 16000,
            default_summary_tokens: 200,
            default_community_tokens: 400,
            importance_threshold: 0.6,
            ..Self::balanced()
        }
    }

    /// Code-focused preset: wide full-detail radius, code preserved in summaries.
    pub fn code_focused() -> Self {
        Self {
            full_context_distance: 3,
            summary_distance: 6,
            title_distance: 12,
            max_summary_tokens: 250,
            target_context_size: 12000,
            preserve_code: true,
            ..Self::balanced()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aggressive" => Some(Self::aggressive()),
            "balanced" => Some(Self::balanced()),
            "rich" => Some(Self::rich()),
            "code" | "code_focused" => Some(Self::code_focused()),
            _ => None,
        }
    }

    /// Parse a configuration from TOML. Missing fields take balanced defaults.
    pub fn from_toml_str(contents: &str) -> StrataResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            StrataError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_path(path: &Path) -> StrataResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Config(ConfigError::Parse {
                reason: format!("{}: {}", path.display(), e),
            })
        })?;
        Self::from_toml_str(&contents)
    }

    /// Create from environment variables with fallback to a preset.
    ///
    /// Environment variables:
    /// - `STRATA_PRESET`: preset name (default: balanced)
    /// - `STRATA_FULL_CONTEXT_DISTANCE`
    /// - `STRATA_SUMMARY_DISTANCE`
    /// - `STRATA_TITLE_DISTANCE`
    /// - `STRATA_TARGET_CONTEXT_SIZE`
    /// - `STRATA_IMPORTANCE_THRESHOLD`
    /// - `STRATA_DAILY_BUDGET`
    pub fn from_env() -> Self {
        let defaults = std::env::var("STRATA_PRESET")
            .ok()
            .and_then(|name| Self::preset(&name))
            .unwrap_or_else(Self::balanced);

        Self {
            full_context_distance: env_or("STRATA_FULL_CONTEXT_DISTANCE", defaults.full_context_distance),
            summary_distance: env_or("STRATA_SUMMARY_DISTANCE", defaults.summary_distance),
            title_distance: env_or("STRATA_TITLE_DISTANCE", defaults.title_distance),
            target_context_size: env_or("STRATA_TARGET_CONTEXT_SIZE", defaults.target_context_size),
            importance_threshold: env_or("STRATA_IMPORTANCE_THRESHOLD", defaults.importance_threshold),
            daily_budget: env_or("STRATA_DAILY_BUDGET", defaults.daily_budget),
            ..defaults
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - full_context_distance <= summary_distance <= title_distance
    /// - token costs and budget > 0
    /// - importance_threshold, min_summary_quality in [0.0, 1.0]
    /// - 0.0 <= min_threshold <= max_threshold <= 1.0
    /// - summary_batch_size > 0, daily_budget >= 0
    pub fn validate(&self) -> StrataResult<()> {
        if self.summary_distance < self.full_context_distance {
            return Err(invalid(
                "summary_distance",
                self.summary_distance,
                "summary_distance must be >= full_context_distance",
            ));
        }
        if self.title_distance < self.summary_distance {
            return Err(invalid(
                "title_distance",
                self.title_distance,
                "title_distance must be >= summary_distance",
            ));
        }
        for (field, value) in [
            ("max_summary_tokens", self.max_summary_tokens),
            ("max_title_tokens", self.max_title_tokens),
            ("target_context_size", self.target_context_size),
            ("default_summary_tokens", self.default_summary_tokens),
            ("default_community_tokens", self.default_community_tokens),
        ] {
            if value <= 0 {
                return Err(invalid(field, value, "must be greater than 0"));
            }
        }
        if !(0.0..=1.0).contains(&self.importance_threshold) {
            return Err(invalid(
                "importance_threshold",
                self.importance_threshold,
                "importance_threshold must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_summary_quality) {
            return Err(invalid(
                "min_summary_quality",
                self.min_summary_quality,
                "min_summary_quality must be between 0.0 and 1.0",
            ));
        }
        if self.summary_batch_size == 0 {
            return Err(invalid("summary_batch_size", 0, "must be greater than 0"));
        }
        if self.daily_budget < 0.0 {
            return Err(invalid("daily_budget", self.daily_budget, "must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.min_threshold) || !(0.0..=1.0).contains(&self.max_threshold) {
            return Err(invalid(
                "min_threshold",
                self.min_threshold,
                "threshold bounds must lie within [0.0, 1.0]",
            ));
        }
        if self.min_threshold > self.max_threshold {
            return Err(invalid(
                "min_threshold",
                self.min_threshold,
                "min_threshold must be <= max_threshold",
            ));
        }
        Ok(())
    }

    /// Token budget to use for a compilation.
    pub fn budget(&self, max_tokens: Option<i32>) -> i32 {
        max_tokens.unwrap_or(self.target_context_size)
    }
}

// ============================================================================
// GATE CONFIG
// ============================================================================

/// Adaptive gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Threshold used until enough history exists
    pub base_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
    /// Exponential smoothing factor applied to each new estimate
    pub adaptation_rate: f32,

    pub percentile_weight: f32,
    pub statistical_weight: f32,
    pub quality_weight: f32,
    pub outlier_method: OutlierMethod,

    /// Raw score history kept per retrieval type
    pub score_window: usize,
    /// Quality, inclusion-rate and recall samples kept per retrieval type
    pub quality_window: usize,
    /// Feedback events kept when a profile is written
    pub feedback_history_limit: usize,
    /// Scores required before the threshold adapts
    pub min_history: usize,
    /// Feedback samples required before precision/recall estimates move
    pub min_quality_samples: usize,

    /// Precision below which the threshold is raised
    pub target_precision: f32,
    /// Recall below which the threshold is lowered
    pub target_recall: f32,
    pub quality_step: f32,

    pub default_min_chunks: usize,
    pub default_max_chunks: usize,
    pub default_target_chunks: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.6,
            min_threshold: 0.3,
            max_threshold: 0.9,
            adaptation_rate: 0.1,
            percentile_weight: 0.4,
            statistical_weight: 0.4,
            quality_weight: 0.2,
            outlier_method: OutlierMethod::Mad,
            score_window: 1000,
            quality_window: 100,
            feedback_history_limit: 100,
            min_history: 20,
            min_quality_samples: 10,
            target_precision: 0.8,
            target_recall: 0.8,
            quality_step: 0.05,
            default_min_chunks: 3,
            default_max_chunks: 10,
            default_target_chunks: 5,
        }
    }
}

impl GateConfig {
    /// Gate defaults with threshold bounds taken from a resolution config.
    pub fn from_resolution(config: &ResolutionConfig) -> Self {
        let defaults = Self::default();
        Self {
            min_threshold: config.min_threshold,
            max_threshold: config.max_threshold,
            base_threshold: bound_threshold(
                defaults.base_threshold,
                config.min_threshold,
                config.max_threshold,
            ),
            ..defaults
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StrataResult<()> {
        for (field, value) in [
            ("min_threshold", self.min_threshold),
            ("max_threshold", self.max_threshold),
            ("base_threshold", self.base_threshold),
        ] {
            if !value.is_finite() {
                return Err(invalid(field, value, "must be a finite number"));
            }
        }
        if self.min_threshold > self.max_threshold {
            return Err(invalid(
                "min_threshold",
                self.min_threshold,
                "min_threshold must be <= max_threshold",
            ));
        }
        if self.base_threshold < self.min_threshold || self.base_threshold > self.max_threshold {
            return Err(invalid(
                "base_threshold",
                self.base_threshold,
                "base_threshold must lie within [min_threshold, max_threshold]",
            ));
        }
        if !(0.0..=1.0).contains(&self.adaptation_rate) {
            return Err(invalid(
                "adaptation_rate",
                self.adaptation_rate,
                "adaptation_rate must be between 0.0 and 1.0",
            ));
        }
        if self.score_window == 0 || self.quality_window == 0 {
            return Err(invalid("score_window", 0, "windows must be greater than 0"));
        }
        if self.default_min_chunks > self.default_max_chunks {
            return Err(invalid(
                "default_min_chunks",
                self.default_min_chunks,
                "default_min_chunks must be <= default_max_chunks",
            ));
        }
        Ok(())
    }
}

/// Clamp `value` into `[min, max]` without panicking on inverted or NaN
/// bounds; `validate` reports those.
pub fn bound_threshold(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> StrataError {
    StrataError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// TESTS
// =============================================================================
