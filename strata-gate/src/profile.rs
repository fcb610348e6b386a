//! Per-project gating profiles and their persistence

use crate::statistics::GatingStatistics;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strata_core::{ChunkFeedback, GateConfig, PersistenceError, StrataResult};

// ============================================================================
// RULES
// ============================================================================

/// Regex rules matched against chunk content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateRules {
    /// Matching chunks are kept, subject to the max-chunks cap
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Matching chunks are dropped before ranking
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl GateRules {
    pub fn is_empty(&self) -> bool {
        self.include_patterns.is_empty() && self.exclude_patterns.is_empty()
    }

    pub(crate) fn compile(&self) -> CompiledRules {
        CompiledRules {
            include: compile_patterns(&self.include_patterns),
            exclude: compile_patterns(&self.exclude_patterns),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid gate rule");
                None
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub(crate) struct CompiledRules {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl CompiledRules {
    pub(crate) fn includes(&self, content: &str) -> bool {
        self.include.iter().any(|re| re.is_match(content))
    }

    pub(crate) fn excludes(&self, content: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(content))
    }
}

// ============================================================================
// PROFILE
// ============================================================================

/// One recorded feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub retrieval_type: String,
    pub recorded_at: DateTime<Utc>,
    pub feedback: ChunkFeedback,
    pub precision: Option<f32>,
    /// Base threshold after the event was applied
    pub base_threshold: f32,
}

/// Adaptive gating state for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingProfile {
    pub project_id: String,
    /// Statistics per retrieval type
    #[serde(default)]
    pub statistics: BTreeMap<String, GatingStatistics>,
    #[serde(default)]
    pub feedback_history: Vec<FeedbackEvent>,
    #[serde(default)]
    pub rules: GateRules,
    #[serde(default)]
    pub total_filtered: u64,
    #[serde(default)]
    pub total_feedback: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatingProfile {
    pub fn new(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            statistics: BTreeMap::new(),
            feedback_history: Vec::new(),
            rules: GateRules::default(),
            total_filtered: 0,
            total_feedback: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Statistics for a retrieval type, created on first use.
    pub fn statistics_mut(&mut self, retrieval_type: &str, config: &GateConfig) -> &mut GatingStatistics {
        self.statistics
            .entry(retrieval_type.to_string())
            .or_insert_with(|| GatingStatistics::new(config))
    }

    /// Re-bound every retrieval type's statistics to `config`.
    pub fn rebound(&mut self, config: &GateConfig) {
        for statistics in self.statistics.values_mut() {
            statistics.rebound(config);
        }
    }

    /// Keep only the most recent `limit` feedback events.
    pub fn trim_history(&mut self, limit: usize) {
        if self.feedback_history.len() > limit {
            let excess = self.feedback_history.len() - limit;
            self.feedback_history.drain(..excess);
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Where profiles live: one JSON file per project, or nowhere.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    root: Option<PathBuf>,
}

impl ProfileStore {
    /// Store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self { root: None }
    }

    /// Store writing `<root>/<project>.json`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// File for a project. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn path_for(&self, project_id: &str) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let mut name: String = project_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() {
            name.push_str("default");
        }
        Some(root.join(format!("{}.json", name)))
    }

    /// Read a project's profile. `Ok(None)` when nothing is stored.
    pub fn load(&self, project_id: &str) -> StrataResult<Option<GatingProfile>> {
        let Some(path) = self.path_for(project_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|e| PersistenceError::io(&path, &e))?;
        let profile: GatingProfile =
            serde_json::from_str(&json).map_err(PersistenceError::from)?;
        Ok(Some(profile))
    }

    /// Write a profile. A no-op for in-memory stores.
    pub fn save(&self, profile: &GatingProfile) -> StrataResult<()> {
        let Some(path) = self.path_for(&profile.project_id) else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, &e))?;
        }
        let json = serde_json::to_string_pretty(profile).map_err(PersistenceError::from)?;
        std::fs::write(&path, json).map_err(|e| PersistenceError::io(&path, &e))?;
        tracing::debug!(path = %path.display(), project_id = %profile.project_id, "Saved gating profile");
        Ok(())
    }
}
