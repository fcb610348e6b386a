//! Node and community summarization
//!
//! A pass is split into three steps so callers can release the graph while
//! the service is working:
//!
//! 1. [`Summarizer::prepare`] reads the graph, selects eligible nodes and
//!    checks the estimated cost against the daily budget.
//! 2. [`Summarizer::execute`] calls the summarization service batch by batch.
//! 3. [`Summarizer::apply`] writes accepted summaries back synchronously.

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use strata_core::{
    estimate_tokens, truncate_chars, truncate_to_token_budget, CommunityId, NodeId,
    ResolutionConfig,
};
use strata_graph::{HistoryGraph, Node};
use strata_llm::{SummarizationService, SummaryResult};

/// Quality assigned to truncation fallbacks.
pub const FALLBACK_QUALITY: f32 = 0.5;

/// Characters of raw content kept per line of a community transcript.
const TRANSCRIPT_LINE_CHARS: usize = 200;

/// Detailed community summaries get this multiple of the short allowance.
const DETAILED_SUMMARY_FACTOR: i32 = 3;

// ============================================================================
// PLAN / OUTCOME / REPORT
// ============================================================================

/// A node selected for summarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCandidate {
    pub node_id: NodeId,
    pub distance: usize,
    /// Content sent to the service, prefixed with surrounding context
    pub request: String,
    /// Raw content, used for truncation fallbacks
    pub raw: String,
}

/// Output of [`Summarizer::prepare`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizationPlan {
    pub batches: Vec<Vec<SummaryCandidate>>,
    pub eligible: usize,
    pub estimated_cost: f64,
    /// The estimate exceeded the remaining daily budget; nothing will run
    pub skipped_for_budget: bool,
}

impl SummarizationPlan {
    /// Whether there is nothing to send to the service.
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &SummaryCandidate> {
        self.batches.iter().flatten()
    }
}

/// One summary produced for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub node_id: NodeId,
    pub summary: String,
    pub token_count: i32,
    pub quality_score: f32,
    pub cost: f64,
    /// Produced by truncation after a service failure
    pub fallback: bool,
}

impl SummaryOutcome {
    fn from_service(node_id: NodeId, result: SummaryResult) -> Self {
        let token_count = if result.token_count > 0 {
            result.token_count
        } else {
            estimate_tokens(&result.summary)
        };
        Self {
            node_id,
            summary: result.summary,
            token_count,
            quality_score: result.quality_score,
            cost: result.cost.max(0.0),
            fallback: false,
        }
    }

    fn fallback(node_id: NodeId, raw: &str, max_tokens: i32) -> Self {
        let summary = truncate_to_token_budget(raw, max_tokens);
        Self {
            node_id,
            token_count: estimate_tokens(&summary),
            summary,
            quality_score: FALLBACK_QUALITY,
            cost: 0.0,
            fallback: true,
        }
    }
}

/// Result of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizationReport {
    pub eligible: usize,
    pub summarized: usize,
    pub rejected: usize,
    pub fallbacks: usize,
    pub skipped_for_budget: bool,
    pub estimated_cost: f64,
    pub actual_cost: f64,
}

/// Cumulative counters across passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizerStats {
    pub total_summarized: u64,
    pub total_rejected: u64,
    pub total_fallbacks: u64,
    pub budget_skips: u64,
    pub total_cost: f64,
    /// Spend on `day`; resets when the date rolls over
    pub spent_today: f64,
    pub day: Option<NaiveDate>,
}

impl SummarizerStats {
    fn spent_on(&self, today: NaiveDate) -> f64 {
        if self.day == Some(today) {
            self.spent_today
        } else {
            0.0
        }
    }

    fn charge(&mut self, cost: f64, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.spent_today = 0.0;
        }
        self.spent_today += cost;
        self.total_cost += cost;
    }
}

// ============================================================================
// SUMMARIZER
// ============================================================================

/// Compresses distant history through a [`SummarizationService`].
pub struct Summarizer {
    config: ResolutionConfig,
    service: Arc<dyn SummarizationService>,
    stats: SummarizerStats,
}

impl Summarizer {
    pub fn new(config: ResolutionConfig, service: Arc<dyn SummarizationService>) -> Self {
        Self {
            config,
            service,
            stats: SummarizerStats::default(),
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SummarizerStats {
        &self.stats
    }

    /// Budget left for today.
    pub fn remaining_budget(&self) -> f64 {
        let today = Utc::now().date_naive();
        (self.config.daily_budget - self.stats.spent_on(today)).max(0.0)
    }

    /// Whether a node at `distance` from the head should be summarized.
    ///
    /// Anything beyond `summary_distance` qualifies. Closer than that,
    /// important nodes get twice the grace distance.
    pub fn is_eligible(&self, node: &Node, distance: usize) -> bool {
        if node.is_summarized() || distance <= self.config.full_context_distance {
            return false;
        }
        if distance > self.config.summary_distance {
            return true;
        }
        if node.is_important(self.config.importance_threshold) {
            distance > self.config.full_context_distance.saturating_mul(2)
        } else {
            true
        }
    }

    /// Eligible nodes reachable from the current node, nearest first.
    pub fn eligible_nodes(&self, graph: &HistoryGraph) -> Vec<(NodeId, usize)> {
        let Some(current) = graph.current_node_id() else {
            return Vec::new();
        };
        graph
            .get_nodes_by_distance(&current, usize::MAX)
            .into_iter()
            .flat_map(|(distance, ids)| ids.into_iter().map(move |id| (id, distance)))
            .filter(|(id, distance)| {
                graph
                    .node(id)
                    .is_some_and(|node| self.is_eligible(node, *distance))
            })
            .collect()
    }

    /// Select candidates and check the estimated cost.
    pub fn prepare(&self, graph: &HistoryGraph) -> SummarizationPlan {
        let eligible = self.eligible_nodes(graph);
        if eligible.is_empty() {
            return SummarizationPlan::default();
        }

        let candidates: Vec<SummaryCandidate> = eligible
            .iter()
            .filter_map(|(id, distance)| {
                graph.node(id).map(|node| SummaryCandidate {
                    node_id: *id,
                    distance: *distance,
                    request: augmented_request(graph, node),
                    raw: node.content.clone(),
                })
            })
            .collect();

        let total_chars: usize = candidates.iter().map(|c| c.raw.chars().count()).sum();
        let avg_len = total_chars / candidates.len().max(1);
        let estimated_cost =
            self.service
                .estimate_cost(candidates.len(), avg_len, self.config.max_summary_tokens);
        let remaining = self.remaining_budget();

        if estimated_cost > remaining {
            tracing::warn!(
                eligible = candidates.len(),
                estimated_cost,
                remaining,
                "Summarization skipped: estimated cost exceeds daily budget"
            );
            return SummarizationPlan {
                batches: Vec::new(),
                eligible: candidates.len(),
                estimated_cost,
                skipped_for_budget: true,
            };
        }

        let batch_size = self.config.summary_batch_size.max(1);
        let eligible_count = candidates.len();
        let mut batches = Vec::with_capacity(eligible_count.div_ceil(batch_size));
        let mut iter = candidates.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(batch_size).collect());
        }

        SummarizationPlan {
            batches,
            eligible: eligible_count,
            estimated_cost,
            skipped_for_budget: false,
        }
    }

    /// Call the service for each batch of the plan.
    ///
    /// A failed batch, or one whose result count does not match, falls back
    /// to truncating the raw content.
    pub async fn execute(&self, plan: &SummarizationPlan) -> Vec<SummaryOutcome> {
        let max_tokens = self.config.max_summary_tokens;
        let mut outcomes = Vec::with_capacity(plan.eligible);

        for batch in &plan.batches {
            let requests: Vec<String> = batch.iter().map(|c| c.request.clone()).collect();
            let results = self
                .service
                .summarize_batch(
                    &requests,
                    max_tokens,
                    self.config.preserve_code,
                    self.config.preserve_decisions,
                )
                .await;

            match results {
                Ok(results) if results.len() == batch.len() => {
                    outcomes.extend(
                        batch
                            .iter()
                            .zip(results)
                            .map(|(c, r)| SummaryOutcome::from_service(c.node_id, r)),
                    );
                }
                Ok(results) => {
                    tracing::warn!(
                        service = self.service.service_id(),
                        expected = batch.len(),
                        got = results.len(),
                        "Summarization result count mismatch, using truncation"
                    );
                    outcomes.extend(
                        batch
                            .iter()
                            .map(|c| SummaryOutcome::fallback(c.node_id, &c.raw, max_tokens)),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service = self.service.service_id(),
                        error = %e,
                        batch = batch.len(),
                        "Summarization failed, using truncation"
                    );
                    outcomes.extend(
                        batch
                            .iter()
                            .map(|c| SummaryOutcome::fallback(c.node_id, &c.raw, max_tokens)),
                    );
                }
            }
        }
        outcomes
    }

    /// Store accepted outcomes in the graph.
    ///
    /// Results below the configured quality are dropped and the node keeps
    /// no summary. Nodes removed or summarized since `prepare` are skipped.
    pub fn apply(
        &mut self,
        graph: &mut HistoryGraph,
        plan: &SummarizationPlan,
        outcomes: Vec<SummaryOutcome>,
    ) -> SummarizationReport {
        let mut report = SummarizationReport {
            eligible: plan.eligible,
            skipped_for_budget: plan.skipped_for_budget,
            estimated_cost: plan.estimated_cost,
            ..Default::default()
        };
        if plan.skipped_for_budget {
            self.stats.budget_skips += 1;
            return report;
        }

        let today = Utc::now().date_naive();
        for outcome in outcomes {
            self.stats.charge(outcome.cost, today);
            report.actual_cost += outcome.cost;
            if outcome.fallback {
                report.fallbacks += 1;
                self.stats.total_fallbacks += 1;
            }

            if !(outcome.quality_score >= self.config.min_summary_quality) {
                tracing::debug!(
                    node_id = %outcome.node_id,
                    quality = outcome.quality_score,
                    min_quality = self.config.min_summary_quality,
                    "Discarded low-quality summary"
                );
                report.rejected += 1;
                self.stats.total_rejected += 1;
                continue;
            }

            let still_pending = graph
                .node(&outcome.node_id)
                .is_some_and(|node| !node.is_summarized());
            if !still_pending {
                continue;
            }
            if graph.update_summary(&outcome.node_id, outcome.summary, outcome.token_count) {
                report.summarized += 1;
                self.stats.total_summarized += 1;
            }
        }

        tracing::info!(
            eligible = report.eligible,
            summarized = report.summarized,
            rejected = report.rejected,
            fallbacks = report.fallbacks,
            cost = report.actual_cost,
            "Summarization pass complete"
        );
        report
    }

    /// Run a full pass against the graph.
    pub async fn summarize_pending(&mut self, graph: &mut HistoryGraph) -> SummarizationReport {
        let plan = self.prepare(graph);
        let outcomes = self.execute(&plan).await;
        self.apply(graph, &plan, outcomes)
    }

    /// Summarize a community from a chronological transcript of its members.
    ///
    /// Stores a short summary and a detailed one. Membership is not touched.
    /// Returns false when the community is unknown or empty, the budget is
    /// exhausted, or the result is below quality.
    pub async fn summarize_community(
        &mut self,
        graph: &mut HistoryGraph,
        community_id: &CommunityId,
    ) -> bool {
        let Some(request) = community_request(graph, community_id) else {
            return false;
        };

        let max_tokens = self.config.default_community_tokens;
        let detailed_tokens = max_tokens.saturating_mul(DETAILED_SUMMARY_FACTOR);
        let length = request.chars().count();
        let estimated = self.service.estimate_cost(1, length, max_tokens)
            + self.service.estimate_cost(1, length, detailed_tokens);
        if estimated > self.remaining_budget() {
            tracing::warn!(
                community_id = %community_id,
                estimated_cost = estimated,
                "Community summarization skipped: estimated cost exceeds daily budget"
            );
            self.stats.budget_skips += 1;
            return false;
        }

        let short = self.summarize_one(&request, max_tokens, community_id).await;
        let detailed = self.summarize_one(&request, detailed_tokens, community_id).await;
        let today = Utc::now().date_naive();
        self.stats.charge(short.cost + detailed.cost, today);

        if !(short.quality_score >= self.config.min_summary_quality) {
            tracing::debug!(
                community_id = %community_id,
                quality = short.quality_score,
                "Discarded low-quality community summary"
            );
            self.stats.total_rejected += 1;
            return false;
        }
        let detailed = (detailed.quality_score >= self.config.min_summary_quality)
            .then_some(detailed.summary);

        let stored = graph.set_community_summary(community_id, short.summary, detailed);
        if stored {
            self.stats.total_summarized += 1;
            tracing::info!(community_id = %community_id, "Community summarized");
        }
        stored
    }

    async fn summarize_one(
        &mut self,
        request: &str,
        max_tokens: i32,
        community_id: &CommunityId,
    ) -> SummaryOutcome {
        let contents = [request.to_string()];
        let result = self
            .service
            .summarize_batch(
                &contents,
                max_tokens,
                self.config.preserve_code,
                self.config.preserve_decisions,
            )
            .await;

        match result.map(|mut r| r.pop()) {
            Ok(Some(r)) => SummaryOutcome::from_service(*community_id, r),
            Ok(None) => {
                tracing::warn!(community_id = %community_id, "Empty community summary response, using truncation");
                self.stats.total_fallbacks += 1;
                SummaryOutcome::fallback(*community_id, request, max_tokens)
            }
            Err(e) => {
                tracing::warn!(community_id = %community_id, error = %e, "Community summarization failed, using truncation");
                self.stats.total_fallbacks += 1;
                SummaryOutcome::fallback(*community_id, request, max_tokens)
            }
        }
    }
}

impl std::fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("service", &self.service.service_id())
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// REQUEST BUILDING
// ============================================================================

/// Node content prefixed with role, time, phase, task and the parent's
/// summary.
fn augmented_request(graph: &HistoryGraph, node: &Node) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Role: {}", node.role);
    let _ = writeln!(
        out,
        "Time: {}",
        node.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "Phase: {}", node.phase);
    if let Some(task) = &node.task_id {
        let _ = writeln!(out, "Task: {}", task);
    }
    if let Some(summary) = node
        .parent_id
        .and_then(|pid| graph.node(&pid))
        .and_then(|parent| parent.summary.as_deref())
    {
        let _ = writeln!(out, "Previous context: {}", summary);
    }
    out.push('\n');
    out.push_str(&node.content);
    out
}

/// Themed transcript of a community's members in chronological order.
fn community_request(graph: &HistoryGraph, community_id: &CommunityId) -> Option<String> {
    let community = graph.community(community_id)?;
    let mut members: Vec<&Node> = community
        .node_ids
        .iter()
        .filter_map(|id| graph.node(id))
        .collect();
    if members.is_empty() {
        return None;
    }
    members.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });

    let mut out = String::new();
    let _ = writeln!(out, "Community: {}", community.name);
    let _ = writeln!(out, "Theme: {}", community.theme);
    if let Some(previous) = &community.summary {
        let _ = writeln!(out, "Previous summary: {}", previous);
    }
    out.push('\n');
    for node in members {
        let body = match &node.summary {
            Some(summary) => summary.clone(),
            None => truncate_chars(&node.content, TRANSCRIPT_LINE_CHARS),
        };
        let _ = writeln!(out, "[{}] {}", node.role, body);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_graph::NewNode;
    use strata_llm::MockSummarizationService;
    use strata_test_utils::{linear_chain, FailingSummarizationService};

    fn mock_summarizer(config: ResolutionConfig) -> Summarizer {
        Summarizer::new(config, Arc::new(MockSummarizationService::new()))
    }

    #[test]
    fn test_eligibility_distance_and_importance() {
        let config = ResolutionConfig::balanced();
        let summarizer = mock_summarizer(config.clone());
        let mut graph = HistoryGraph::new();
        let id = graph.add_node(NewNode::user("hello")).unwrap();
        let node = graph.node(&id).unwrap().clone();

        assert!(!summarizer.is_eligible(&node, config.full_context_distance));
        assert!(summarizer.is_eligible(&node, config.full_context_distance + 1));

        let mut important = node.clone();
        important.importance = 0.95;
        assert!(!summarizer.is_eligible(&important, config.full_context_distance * 2));
        assert!(summarizer.is_eligible(&important, config.full_context_distance * 2 + 1));

        let mut summarized = node;
        summarized.summary = Some("done".to_string());
        assert!(!summarizer.is_eligible(&summarized, 100));
    }

    #[test]
    fn test_important_node_beyond_summary_distance_is_eligible() {
        let config = ResolutionConfig {
            full_context_distance: 3,
            summary_distance: 5,
            ..ResolutionConfig::balanced()
        };
        let summarizer = mock_summarizer(config);
        let mut graph = HistoryGraph::new();
        let id = graph.add_node(NewNode::user("keep this").with_importance(0.95)).unwrap();
        let important = graph.node(&id).unwrap();

        // Grace would be 6, but distance 6 is past summary_distance.
        assert!(!summarizer.is_eligible(important, 5));
        assert!(summarizer.is_eligible(important, 6));
        assert!(!summarizer.is_eligible(important, 3));
    }

    #[test]
    fn test_eligible_nodes_on_chain() {
        let (graph, ids) = linear_chain(8);
        let summarizer = mock_summarizer(ResolutionConfig::balanced());
        let eligible = summarizer.eligible_nodes(&graph);

        // Head is ids[7]; full_context_distance is 2.
        let eligible_ids: Vec<NodeId> = eligible.iter().map(|(id, _)| *id).collect();
        assert_eq!(eligible_ids, vec![ids[4], ids[3], ids[2], ids[1], ids[0]]);
        assert!(eligible.iter().all(|(_, d)| *d > 2));
    }

    #[test]
    fn test_prepare_batches_and_augments() {
        let mut config = ResolutionConfig::balanced();
        config.summary_batch_size = 2;
        let (graph, ids) = linear_chain(8);
        let plan = mock_summarizer(config).prepare(&graph);

        assert_eq!(plan.eligible, 5);
        assert_eq!(plan.batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert!(!plan.skipped_for_budget);

        let first = &plan.batches[0][0];
        assert_eq!(first.node_id, ids[4]);
        assert!(first.request.starts_with("Role: "));
        assert!(first.request.contains("Phase: "));
        assert!(first.request.ends_with(&first.raw));
    }

    #[test]
    fn test_prepare_empty_graph() {
        let plan = mock_summarizer(ResolutionConfig::balanced()).prepare(&HistoryGraph::new());
        assert!(plan.is_empty());
        assert_eq!(plan.eligible, 0);
    }

    #[tokio::test]
    async fn test_summarize_pending_stores_summaries() {
        let (mut graph, ids) = linear_chain(8);
        let mut summarizer = mock_summarizer(ResolutionConfig::balanced());
        let report = summarizer.summarize_pending(&mut graph).await;

        assert_eq!(report.eligible, 5);
        assert_eq!(report.summarized, 5);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.fallbacks, 0);
        for id in &ids[..5] {
            let node = graph.node(id).unwrap();
            assert!(node.summary.as_deref().unwrap().starts_with("Summary: "));
            assert_eq!(node.summary_version, 1);
            assert!(node.summary_tokens > 0);
        }
        for id in &ids[5..] {
            assert!(!graph.node(id).unwrap().is_summarized());
        }
        assert_eq!(summarizer.stats().total_summarized, 5);

        // Second pass has nothing left to do.
        let again = summarizer.summarize_pending(&mut graph).await;
        assert_eq!(again.eligible, 0);
        assert_eq!(again.summarized, 0);
    }

    #[tokio::test]
    async fn test_budget_exceeded_skips_whole_batch() {
        let mut config = ResolutionConfig::balanced();
        config.daily_budget = 0.0001;
        let service = MockSummarizationService::new().with_cost_per_1k_tokens(10.0);
        let mut summarizer = Summarizer::new(config, Arc::new(service));
        let (mut graph, ids) = linear_chain(8);

        let report = summarizer.summarize_pending(&mut graph).await;
        assert!(report.skipped_for_budget);
        assert_eq!(report.eligible, 5);
        assert_eq!(report.summarized, 0);
        assert!(report.estimated_cost > 0.0001);
        assert!(ids.iter().all(|id| !graph.node(id).unwrap().is_summarized()));
        assert_eq!(summarizer.stats().budget_skips, 1);
    }

    #[tokio::test]
    async fn test_spend_is_tracked_against_budget() {
        let mut config = ResolutionConfig::balanced();
        config.daily_budget = 100.0;
        let service = MockSummarizationService::new().with_cost_per_1k_tokens(1.0);
        let mut summarizer = Summarizer::new(config, Arc::new(service));
        let (mut graph, _) = linear_chain(8);

        let report = summarizer.summarize_pending(&mut graph).await;
        assert!(report.actual_cost > 0.0);
        let stats = summarizer.stats();
        assert!((stats.spent_today - report.actual_cost).abs() < 1e-9);
        assert!((summarizer.remaining_budget() - (100.0 - report.actual_cost)).abs() < 1e-9);
        assert_eq!(stats.day, Some(Utc::now().date_naive()));
    }

    #[tokio::test]
    async fn test_service_failure_falls_back_to_truncation() {
        let config = ResolutionConfig::balanced();
        let max_tokens = config.max_summary_tokens;
        let mut summarizer = Summarizer::new(config, Arc::new(FailingSummarizationService));
        let (mut graph, ids) = linear_chain(8);

        let report = summarizer.summarize_pending(&mut graph).await;
        assert_eq!(report.fallbacks, 5);
        assert_eq!(report.summarized, 5);
        assert_eq!(report.actual_cost, 0.0);

        let node = graph.node(&ids[0]).unwrap();
        assert_eq!(
            node.summary.as_deref(),
            Some(truncate_to_token_budget(&node.content, max_tokens).as_str())
        );
        assert_eq!(summarizer.stats().total_fallbacks, 5);
    }

    #[tokio::test]
    async fn test_low_quality_results_are_discarded() {
        let mut config = ResolutionConfig::balanced();
        config.min_summary_quality = 0.9;
        let mut summarizer = mock_summarizer(config);
        let (mut graph, ids) = linear_chain(8);

        let report = summarizer.summarize_pending(&mut graph).await;
        assert_eq!(report.rejected, 5);
        assert_eq!(report.summarized, 0);
        assert!(ids.iter().all(|id| !graph.node(id).unwrap().is_summarized()));
    }

    #[tokio::test]
    async fn test_apply_skips_nodes_summarized_meanwhile() {
        let (mut graph, ids) = linear_chain(8);
        let mut summarizer = mock_summarizer(ResolutionConfig::balanced());
        let plan = summarizer.prepare(&graph);
        let outcomes = summarizer.execute(&plan).await;

        graph.update_summary(&ids[0], "manual".to_string(), 1);
        let report = summarizer.apply(&mut graph, &plan, outcomes);
        assert_eq!(report.summarized, 4);
        assert_eq!(graph.node(&ids[0]).unwrap().summary.as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn test_community_summary_membership_stable() {
        let (mut graph, ids) = linear_chain(6);
        let members = [ids[0], ids[1], ids[2], ids[3]];
        let cid = graph.create_community("auth", "login flow", &members, None);
        let created = graph.community(&cid).unwrap().last_updated;
        let mut summarizer = mock_summarizer(ResolutionConfig::balanced());

        assert!(summarizer.summarize_community(&mut graph, &cid).await);
        let first = graph.community(&cid).unwrap().clone();
        assert!(first.summary.is_some());
        assert!(first.detailed_summary.is_some());
        assert!(first.last_updated > created);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(summarizer.summarize_community(&mut graph, &cid).await);
        let second = graph.community(&cid).unwrap().clone();

        let mut before = first.node_ids.clone();
        let mut after = second.node_ids.clone();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(after.len(), 4);
        assert_ne!(first.summary, second.summary);
        assert!(second.last_updated > first.last_updated);
    }

    #[tokio::test]
    async fn test_community_transcript_is_chronological() {
        let (mut graph, ids) = linear_chain(3);
        let cid = graph.create_community("c", "t", &[ids[2], ids[0], ids[1]], None);
        let request = community_request(&graph, &cid).unwrap();

        let positions: Vec<usize> = ids
            .iter()
            .map(|id| {
                let content = &graph.node(id).unwrap().content;
                request.find(content.as_str()).unwrap()
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(request.starts_with("Community: c\nTheme: t\n"));
    }

    #[tokio::test]
    async fn test_unknown_or_empty_community() {
        let mut graph = HistoryGraph::new();
        let mut summarizer = mock_summarizer(ResolutionConfig::balanced());
        assert!(!summarizer.summarize_community(&mut graph, &strata_core::new_id()).await);

        let cid = graph.create_community("empty", "nothing", &[], None);
        assert!(!summarizer.summarize_community(&mut graph, &cid).await);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use strata_llm::MockSummarizationService;
    use strata_test_utils::linear_chain;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_eligible_nodes_respect_grace(len in 1usize..30, full in 0usize..5) {
            let mut config = ResolutionConfig::balanced();
            config.full_context_distance = full;
            let summarizer = Summarizer::new(config, Arc::new(MockSummarizationService::new()));
            let (graph, _) = linear_chain(len);

            let eligible = summarizer.eligible_nodes(&graph);
            prop_assert_eq!(eligible.len(), len.saturating_sub(full + 1));
            for (_, distance) in eligible {
                prop_assert!(distance > full);
            }
        }

        #[test]
        fn prop_beyond_summary_distance_always_eligible(
            full in 0usize..6,
            extra in 0usize..6,
            beyond in 1usize..10,
            importance in 0.0f32..=1.0,
        ) {
            let config = ResolutionConfig {
                full_context_distance: full,
                summary_distance: full + extra,
                ..ResolutionConfig::balanced()
            };
            let summarizer = Summarizer::new(config, Arc::new(MockSummarizationService::new()));
            let mut graph = HistoryGraph::new();
            let id = graph
                .add_node(strata_graph::NewNode::user("x").with_importance(importance))
                .unwrap();
            let node = graph.node(&id).unwrap();
            prop_assert!(summarizer.is_eligible(node, full + extra + beyond));
            prop_assert!(!summarizer.is_eligible(node, full));
        }

        #[test]
        fn prop_plan_batches_cover_eligible(len in 1usize..30, batch in 1usize..8) {
            let mut config = ResolutionConfig::balanced();
            config.summary_batch_size = batch;
            let summarizer = Summarizer::new(config, Arc::new(MockSummarizationService::new()));
            let (graph, _) = linear_chain(len);

            let plan = summarizer.prepare(&graph);
            prop_assert_eq!(plan.candidates().count(), plan.eligible);
            prop_assert!(plan.batches.iter().all(|b| !b.is_empty() && b.len() <= batch));
        }
    }
}
