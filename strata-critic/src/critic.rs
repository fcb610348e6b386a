//! Context quality critique

use crate::blindspots::{response_blindspots, task_blindspots};
use crate::terms::term_overlap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use strata_core::{ChunkFeedback, ContextChunk, TaskType};
use strata_llm::Judge;

/// Relevance below which a chunk counts as noise.
pub const NOISE_RELEVANCE: f32 = 0.3;

const SIMILARITY_WEIGHT: f32 = 0.7;
const OVERLAP_WEIGHT: f32 = 0.3;

/// Relevance range in which the judge is consulted.
const JUDGE_BAND: (f32, f32) = (0.4, 0.7);

/// Relevance factor for import-only chunks on code and debugging tasks.
const IMPORT_DISCOUNT: f32 = 0.5;
/// Relevance factor for test code when the query doesn't mention tests.
const TEST_DISCOUNT: f32 = 0.7;
/// Relevance factor for doc comments on documentation tasks.
const DOC_BOOST: f32 = 1.2;

/// Quality deducted per blindspot, up to `BLINDSPOT_PENALTY_CAP`.
const BLINDSPOT_PENALTY: f32 = 0.05;
const BLINDSPOT_PENALTY_CAP: f32 = 0.2;
/// Quality deducted per unnecessary chunk, up to `UNNECESSARY_PENALTY_CAP`.
const UNNECESSARY_PENALTY: f32 = 0.025;
const UNNECESSARY_PENALTY_CAP: f32 = 0.1;

/// Deduction from the weighted metric score.
fn quality_penalty(blindspots: usize, unnecessary: usize) -> f32 {
    (BLINDSPOT_PENALTY * blindspots as f32).min(BLINDSPOT_PENALTY_CAP)
        + (UNNECESSARY_PENALTY * unnecessary as f32).min(UNNECESSARY_PENALTY_CAP)
}

// ============================================================================
// TYPES
// ============================================================================

/// Aggregate measurements behind an overall score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueMetrics {
    pub avg_relevance: f32,
    /// 1 minus the spread between the highest and lowest similarity
    pub coverage: f32,
    /// Share of chunks duplicating another chunk's content
    pub redundancy: f32,
    pub noise_ratio: f32,
    /// 1 / (1 + blindspots)
    pub completeness: f32,
}

impl CritiqueMetrics {
    /// Weighted combination; redundancy and noise count inverted.
    pub fn weighted_score(&self) -> f32 {
        0.3 * self.avg_relevance
            + 0.1 * self.coverage
            + 0.1 * (1.0 - self.redundancy)
            + 0.2 * (1.0 - self.noise_ratio)
            + 0.3 * self.completeness
    }
}

/// Verdict on the context assembled for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCritique {
    /// Overall quality in [0, 1]
    pub overall_quality: f32,
    pub chunk_relevance: BTreeMap<String, f32>,
    pub blindspots: Vec<String>,
    pub unnecessary_chunks: Vec<String>,
    pub suggestions: Vec<String>,
    pub metrics: CritiqueMetrics,
    pub task_type: TaskType,
    /// Some relevance or blindspot came from the judge
    pub used_judge: bool,
}

impl ContextCritique {
    pub fn relevance(&self, chunk_id: &str) -> Option<f32> {
        self.chunk_relevance.get(chunk_id).copied()
    }
}

// ============================================================================
// CRITIC
// ============================================================================

/// Scores retrieved context against a query.
///
/// Works fully offline; an optional [`Judge`] refines borderline chunk scores
/// and adds blindspots. Judge failures are logged and ignored.
#[derive(Clone, Default)]
pub struct QualityCritic {
    judge: Option<Arc<dyn Judge>>,
}

impl QualityCritic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judge(judge: Arc<dyn Judge>) -> Self {
        Self { judge: Some(judge) }
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    /// Heuristic relevance of one chunk, before any judge refinement.
    pub fn heuristic_relevance(&self, query: &str, chunk: &ContextChunk, task_type: TaskType) -> f32 {
        let similarity = chunk.similarity.clamp(0.0, 1.0);
        let similarity = if similarity.is_nan() { 0.0 } else { similarity };
        let base = SIMILARITY_WEIGHT * similarity + OVERLAP_WEIGHT * term_overlap(query, &chunk.content);
        (base * task_factor(query, &chunk.content, task_type)).clamp(0.0, 1.0)
    }

    /// Critique `chunks` as context for `query`, optionally checking a
    /// response produced from them.
    pub async fn critique(
        &self,
        query: &str,
        chunks: &[ContextChunk],
        response: Option<&str>,
        task_type: TaskType,
    ) -> ContextCritique {
        let mut used_judge = false;
        let mut chunk_relevance = BTreeMap::new();
        let mut relevances = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let mut relevance = self.heuristic_relevance(query, chunk, task_type);
            if let Some(judge) = &self.judge {
                if (JUDGE_BAND.0..=JUDGE_BAND.1).contains(&relevance) {
                    match judge.score_relevance(&chunk.content, query, task_type).await {
                        Ok(score) if score.is_finite() => {
                            relevance = (relevance + score.clamp(0.0, 1.0)) / 2.0;
                            used_judge = true;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "Judge scoring failed, keeping heuristic relevance");
                        }
                    }
                }
            }
            chunk_relevance.insert(chunk.chunk_id.clone(), relevance);
            relevances.push(relevance);
        }

        let unnecessary_chunks: Vec<String> = chunks
            .iter()
            .zip(&relevances)
            .filter(|(_, r)| **r < NOISE_RELEVANCE)
            .map(|(c, _)| c.chunk_id.clone())
            .collect();

        let combined: String = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut blindspots = Vec::new();
        if chunks.is_empty() && !query.trim().is_empty() {
            blindspots.push("No context was retrieved for the query".to_string());
        }
        if let Some(response) = response {
            blindspots.extend(response_blindspots(response, &combined));
        }
        blindspots.extend(task_blindspots(task_type, query, &combined));
        if let Some(judge) = &self.judge {
            match judge.list_blindspots(query, &combined, task_type).await {
                Ok(extra) => {
                    for item in extra {
                        let item = item.trim().to_string();
                        if !item.is_empty() && !blindspots.contains(&item) {
                            blindspots.push(item);
                            used_judge = true;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Judge blindspot listing failed");
                }
            }
        }

        let metrics = compute_metrics(chunks, &relevances, blindspots.len());
        let penalty = quality_penalty(blindspots.len(), unnecessary_chunks.len());
        let overall_quality = (metrics.weighted_score() - penalty).clamp(0.0, 1.0);
        let suggestions = suggestions(&metrics, &blindspots, &unnecessary_chunks);

        tracing::debug!(
            chunks = chunks.len(),
            overall_quality,
            blindspots = blindspots.len(),
            unnecessary = unnecessary_chunks.len(),
            used_judge,
            "Critiqued context"
        );

        ContextCritique {
            overall_quality,
            chunk_relevance,
            blindspots,
            unnecessary_chunks,
            suggestions,
            metrics,
            task_type,
            used_judge,
        }
    }

    /// Feedback for the gate from a critique of `chunks`.
    ///
    /// A chunk is useful when its relevance reaches [`NOISE_RELEVANCE`];
    /// blindspots become the missing-context note.
    pub fn to_feedback(critique: &ContextCritique, chunks: &[ContextChunk]) -> ChunkFeedback {
        let useful = chunks
            .iter()
            .map(|c| critique.relevance(&c.chunk_id).unwrap_or(0.0) >= NOISE_RELEVANCE)
            .collect();
        let missing_context = (!critique.blindspots.is_empty()).then(|| critique.blindspots.join("; "));
        ChunkFeedback {
            chunk_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
            useful,
            missing_context,
            unnecessary_chunk_ids: critique.unnecessary_chunks.clone(),
        }
    }
}

impl std::fmt::Debug for QualityCritic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityCritic")
            .field("judge", &self.judge.is_some())
            .finish()
    }
}

fn task_factor(query: &str, content: &str, task_type: TaskType) -> f32 {
    let query_lower = query.to_lowercase();
    match task_type {
        TaskType::Code | TaskType::Debugging => {
            if is_import_only(content) && !query_lower.contains("import") {
                IMPORT_DISCOUNT
            } else if is_test_code(content) && !query_lower.contains("test") {
                TEST_DISCOUNT
            } else {
                1.0
            }
        }
        TaskType::Documentation if has_doc_markers(content) => DOC_BOOST,
        _ => 1.0,
    }
}

fn is_import_only(content: &str) -> bool {
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| {
            (!l.is_empty() && !l.starts_with("//") && !l.starts_with('#')) || l.starts_with("#include")
        })
        .peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|l| {
        ["use ", "pub use ", "import ", "from ", "#include", "extern crate ", "require("]
            .iter()
            .any(|prefix| l.starts_with(prefix))
            || l.contains("= require(")
    })
}

fn is_test_code(content: &str) -> bool {
    ["#[test]", "#[tokio::test]", "def test_", "@Test", "describe(", "it(\"", "assert_eq!", "assertEqual"]
        .iter()
        .any(|marker| content.contains(marker))
}

fn has_doc_markers(content: &str) -> bool {
    content.lines().map(str::trim_start).any(|l| {
        l.starts_with("///")
            || l.starts_with("//!")
            || l.starts_with("/**")
            || l.starts_with("\"\"\"")
            || l.starts_with("# ")
            || l.starts_with("## ")
            || l.starts_with("@param")
            || l.starts_with("@returns")
    })
}

fn compute_metrics(chunks: &[ContextChunk], relevances: &[f32], blindspots: usize) -> CritiqueMetrics {
    let completeness = 1.0 / (1.0 + blindspots as f32);
    if chunks.is_empty() {
        return CritiqueMetrics {
            completeness,
            ..Default::default()
        };
    }

    let n = chunks.len() as f32;
    let avg_relevance = relevances.iter().sum::<f32>() / n;
    let similarities = chunks.iter().map(|c| c.similarity.clamp(0.0, 1.0));
    let (lo, hi) = similarities.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s), hi.max(s))
    });
    let coverage = (1.0 - (hi - lo)).clamp(0.0, 1.0);

    let distinct: HashSet<String> = chunks.iter().map(|c| normalize(&c.content)).collect();
    let redundancy = 1.0 - distinct.len() as f32 / n;
    let noise_ratio = relevances.iter().filter(|r| **r < NOISE_RELEVANCE).count() as f32 / n;

    CritiqueMetrics {
        avg_relevance,
        coverage,
        redundancy,
        noise_ratio,
        completeness,
    }
}

fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn suggestions(metrics: &CritiqueMetrics, blindspots: &[String], unnecessary: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    if !blindspots.is_empty() {
        out.push(format!(
            "Retrieve additional context covering: {}",
            blindspots.join("; ")
        ));
    }
    if !unnecessary.is_empty() {
        out.push(format!(
            "Drop {} low-relevance chunk(s) or raise the similarity threshold",
            unnecessary.len()
        ));
    }
    if metrics.redundancy > 0.2 {
        out.push("Deduplicate overlapping chunks".to_string());
    }
    if metrics.coverage < 0.5 {
        out.push("Similarity varies widely; consider a more specific query".to_string());
    }
    out
}

// ============================================================================
// HISTORY
// ============================================================================

/// Rolling window of overall quality scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueHistory {
    scores: VecDeque<f32>,
    limit: usize,
}

impl CritiqueHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            scores: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn record(&mut self, critique: &ContextCritique) {
        self.scores.push_back(critique.overall_quality);
        while self.scores.len() > self.limit {
            self.scores.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn average(&self) -> Option<f32> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.iter().sum::<f32>() / self.scores.len() as f32)
    }

    /// Mean of the newer half minus mean of the older half.
    pub fn trend(&self) -> Option<f32> {
        if self.scores.len() < 2 {
            return None;
        }
        let mid = self.scores.len() / 2;
        let older: Vec<f32> = self.scores.iter().take(mid).copied().collect();
        let newer: Vec<f32> = self.scores.iter().skip(mid).copied().collect();
        let avg = |v: &[f32]| v.iter().sum::<f32>() / v.len() as f32;
        Some(avg(&newer) - avg(&older))
    }
}

impl Default for CritiqueHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test_utils::{FailingJudge, StaticJudge};

    const EPS: f32 = 1e-5;

    fn chunk(id: &str, content: &str, similarity: f32) -> ContextChunk {
        ContextChunk::new(id, content, similarity)
    }

    #[test]
    fn test_heuristic_relevance_formula() {
        let critic = QualityCritic::new();
        let c = chunk("a", "token budget allocation", 0.8);
        let r = critic.heuristic_relevance("token budget", &c, TaskType::General);
        assert!((r - (0.7 * 0.8 + 0.3 * 1.0)).abs() < EPS);

        let unrelated = chunk("b", "weather report", 0.2);
        let r = critic.heuristic_relevance("token budget", &unrelated, TaskType::General);
        assert!((r - 0.14).abs() < EPS);
    }

    #[test]
    fn test_quality_penalty_steps_and_caps() {
        assert_eq!(quality_penalty(0, 0), 0.0);
        assert!((quality_penalty(1, 0) - BLINDSPOT_PENALTY).abs() < EPS);
        assert!((quality_penalty(0, 2) - 2.0 * UNNECESSARY_PENALTY).abs() < EPS);
        assert!((quality_penalty(50, 50) - (BLINDSPOT_PENALTY_CAP + UNNECESSARY_PENALTY_CAP)).abs() < EPS);
    }

    #[test]
    fn test_task_adjustments() {
        let critic = QualityCritic::new();
        let imports = chunk("i", "use std::fmt;\nuse serde::Serialize;", 0.8);
        let plain = critic.heuristic_relevance("format output", &imports, TaskType::General);
        let code = critic.heuristic_relevance("format output", &imports, TaskType::Code);
        assert!((code - plain * 0.5).abs() < EPS);
        let asked = critic.heuristic_relevance("which import is used", &imports, TaskType::Code);
        assert!(asked > code);

        let tests = chunk("t", "#[test]\nfn parses() { assert_eq!(1, 1); }", 0.8);
        let plain = critic.heuristic_relevance("parser", &tests, TaskType::General);
        let code = critic.heuristic_relevance("parser", &tests, TaskType::Code);
        assert!((code - plain * 0.7).abs() < EPS);

        let docs = chunk("d", "/// Parses the config file.\nfn parse() {}", 0.5);
        let plain = critic.heuristic_relevance("config", &docs, TaskType::General);
        let boosted = critic.heuristic_relevance("config", &docs, TaskType::Documentation);
        assert!((boosted - plain * 1.2).abs() < EPS);
    }

    #[tokio::test]
    async fn test_critique_flags_noise() {
        let critic = QualityCritic::new();
        let chunks = vec![
            chunk("good", "token budget allocation across tiers", 0.9),
            chunk("bad", "unrelated recipe for soup", 0.1),
        ];
        let critique = critic
            .critique("token budget", &chunks, None, TaskType::General)
            .await;

        assert_eq!(critique.unnecessary_chunks, vec!["bad".to_string()]);
        assert!((critique.metrics.noise_ratio - 0.5).abs() < EPS);
        assert!((critique.metrics.coverage - 0.2).abs() < EPS);
        assert_eq!(critique.metrics.redundancy, 0.0);
        assert_eq!(critique.metrics.completeness, 1.0);
        assert!(critique.blindspots.is_empty());
        assert!(!critique.used_judge);
    }

    #[tokio::test]
    async fn test_overall_quality_formula() {
        let critic = QualityCritic::new();
        let chunks = vec![
            chunk("a", "alpha beta", 0.6),
            chunk("b", "alpha beta", 0.6),
        ];
        let critique = critic
            .critique("gamma", &chunks, Some("`delta` is undefined"), TaskType::General)
            .await;

        // relevance 0.42 each, coverage 1, redundancy 0.5, noise 0, one blindspot
        let m = critique.metrics;
        assert!((m.avg_relevance - 0.42).abs() < EPS);
        assert!((m.coverage - 1.0).abs() < EPS);
        assert!((m.redundancy - 0.5).abs() < EPS);
        assert_eq!(m.noise_ratio, 0.0);
        assert!((m.completeness - 0.5).abs() < EPS);
        let expected = 0.3 * 0.42 + 0.1 + 0.1 * 0.5 + 0.2 + 0.3 * 0.5 - 0.05;
        assert!((critique.overall_quality - expected).abs() < EPS);
        assert_eq!(critique.blindspots, vec!["Missing context for `delta`".to_string()]);
    }

    #[tokio::test]
    async fn test_penalties_are_capped() {
        let critic = QualityCritic::new();
        let chunks: Vec<ContextChunk> = (0..8)
            .map(|i| chunk(&format!("c{}", i), &format!("noise {}", i), 0.0))
            .collect();
        let response = "`a1` is undefined. `a2` is undefined. `a3` is undefined. \
                        `a4` is undefined. `a5` is undefined. `a6` is undefined.";
        let critique = critic
            .critique("query words", &chunks, Some(response), TaskType::General)
            .await;

        assert_eq!(critique.blindspots.len(), 6);
        assert_eq!(critique.unnecessary_chunks.len(), 8);
        let m = critique.metrics;
        let expected = (m.weighted_score() - 0.2 - 0.1).clamp(0.0, 1.0);
        assert!((critique.overall_quality - expected).abs() < EPS);
    }

    #[tokio::test]
    async fn test_empty_chunks() {
        let critic = QualityCritic::new();
        let critique = critic.critique("anything", &[], None, TaskType::General).await;
        assert_eq!(critique.blindspots.len(), 1);
        assert!(critique.overall_quality >= 0.0 && critique.overall_quality <= 1.0);
        assert!(critique.chunk_relevance.is_empty());
    }

    #[tokio::test]
    async fn test_code_task_detects_undefined_call() {
        let critic = QualityCritic::new();
        let chunks = vec![chunk("c", "fn run() {\n    let x = compute_total(items);\n}", 0.8)];
        let critique = critic
            .critique("how does run work", &chunks, None, TaskType::Code)
            .await;
        assert_eq!(critique.blindspots.len(), 1);
        assert!(critique.blindspots[0].contains("compute_total"));
    }

    #[tokio::test]
    async fn test_judge_refines_borderline_scores() {
        let critic = QualityCritic::with_judge(Arc::new(StaticJudge::new(1.0)));
        let chunks = vec![
            chunk("border", "something else", 0.8),
            chunk("high", "token budget", 1.0),
        ];
        let critique = critic
            .critique("token budget", &chunks, None, TaskType::General)
            .await;

        // 0.56 is inside the band and is averaged with the judge's 1.0.
        assert!((critique.relevance("border").unwrap() - 0.78).abs() < EPS);
        assert!((critique.relevance("high").unwrap() - 1.0).abs() < EPS);
        assert!(critique.used_judge);
    }

    #[tokio::test]
    async fn test_judge_blindspots_are_merged() {
        let judge = StaticJudge::new(0.5).with_blindspots(vec!["retry policy".to_string()]);
        let critic = QualityCritic::with_judge(Arc::new(judge));
        let chunks = vec![chunk("a", "token budget", 0.9)];
        let critique = critic.critique("token budget", &chunks, None, TaskType::General).await;
        assert_eq!(critique.blindspots, vec!["retry policy".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_judge_degrades_to_heuristics() {
        let critic = QualityCritic::with_judge(Arc::new(FailingJudge));
        let plain = QualityCritic::new();
        let chunks = vec![chunk("border", "something else", 0.8)];

        let with_judge = critic.critique("token budget", &chunks, None, TaskType::General).await;
        let without = plain.critique("token budget", &chunks, None, TaskType::General).await;
        assert_eq!(with_judge.chunk_relevance, without.chunk_relevance);
        assert_eq!(with_judge.overall_quality, without.overall_quality);
        assert!(!with_judge.used_judge);
    }

    #[tokio::test]
    async fn test_to_feedback() {
        let critic = QualityCritic::new();
        let chunks = vec![
            chunk("good", "token budget", 0.9),
            chunk("bad", "soup", 0.05),
        ];
        let critique = critic
            .critique("token budget", &chunks, Some("`allocator` is not defined"), TaskType::General)
            .await;
        let feedback = QualityCritic::to_feedback(&critique, &chunks);

        assert_eq!(feedback.chunk_ids, vec!["good".to_string(), "bad".to_string()]);
        assert_eq!(feedback.useful, vec![true, false]);
        assert_eq!(feedback.unnecessary_chunk_ids, vec!["bad".to_string()]);
        assert!(feedback.reports_missing_context());
        assert!(feedback.missing_context.unwrap().contains("allocator"));
    }

    #[test]
    fn test_history() {
        let mut history = CritiqueHistory::new(4);
        assert!(history.average().is_none());
        for q in [0.2, 0.4, 0.6, 0.8, 1.0] {
            history.record(&ContextCritique {
                overall_quality: q,
                chunk_relevance: BTreeMap::new(),
                blindspots: Vec::new(),
                unnecessary_chunks: Vec::new(),
                suggestions: Vec::new(),
                metrics: CritiqueMetrics::default(),
                task_type: TaskType::General,
                used_judge: false,
            });
        }
        assert_eq!(history.len(), 4);
        assert!((history.average().unwrap() - 0.7).abs() < EPS);
        assert!((history.trend().unwrap() - 0.4).abs() < EPS);
    }
}
