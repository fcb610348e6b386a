//! Strata Test Utilities
//!
//! Shared test infrastructure for the Strata workspace:
//! - Service doubles that fail or answer with fixed values
//! - Proptest generators for configs, nodes, chunks and feedback
//! - Graph fixtures for common scenarios
//! - Assertions for invariants checked across crates

pub use strata_core::{
    ChunkFeedback, ContextChunk, ConversationPhase, LlmError, NodeId, NodeRole, ResolutionConfig,
    StrataError, StrataResult, TaskType,
};
pub use strata_graph::{HistoryGraph, NewNode};

pub use fixtures::linear_chain;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_llm::{Judge, RetrievalService, SearchFilters, SummarizationService, SummaryResult};

// ============================================================================
// SERVICE DOUBLES
// ============================================================================

/// Summarization service whose every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSummarizationService;

#[async_trait]
impl SummarizationService for FailingSummarizationService {
    async fn summarize_batch(
        &self,
        _contents: &[String],
        _max_tokens: i32,
        _preserve_code: bool,
        _preserve_decisions: bool,
    ) -> StrataResult<Vec<SummaryResult>> {
        Err(LlmError::SummarizationFailed {
            reason: "service unavailable".to_string(),
        }
        .into())
    }

    fn estimate_cost(&self, _node_count: usize, _avg_content_length: usize, _max_tokens: i32) -> f64 {
        0.0
    }

    fn service_id(&self) -> &str {
        "failing"
    }
}

/// Retrieval service whose every search fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRetrievalService;

#[async_trait]
impl RetrievalService for FailingRetrievalService {
    async fn search(
        &self,
        _query: &str,
        _k: usize,
        _filters: Option<&SearchFilters>,
    ) -> StrataResult<Vec<ContextChunk>> {
        Err(LlmError::RetrievalFailed {
            reason: "index offline".to_string(),
        }
        .into())
    }
}

/// Judge returning a fixed score and blindspot list, counting calls.
#[derive(Debug, Default)]
pub struct StaticJudge {
    score: f32,
    blindspots: Vec<String>,
    calls: AtomicUsize,
}

impl StaticJudge {
    pub fn new(score: f32) -> Self {
        Self {
            score,
            blindspots: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_blindspots(mut self, blindspots: Vec<String>) -> Self {
        self.blindspots = blindspots;
        self
    }

    /// Relevance calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Judge for StaticJudge {
    async fn score_relevance(&self, _content: &str, _query: &str, _task_type: TaskType) -> StrataResult<f32> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.score)
    }

    async fn list_blindspots(
        &self,
        _query: &str,
        _context: &str,
        _task_type: TaskType,
    ) -> StrataResult<Vec<String>> {
        Ok(self.blindspots.clone())
    }
}

/// Judge whose every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingJudge;

#[async_trait]
impl Judge for FailingJudge {
    async fn score_relevance(&self, _content: &str, _query: &str, _task_type: TaskType) -> StrataResult<f32> {
        Err(LlmError::JudgeFailed {
            reason: "judge unavailable".to_string(),
        }
        .into())
    }

    async fn list_blindspots(
        &self,
        _query: &str,
        _context: &str,
        _task_type: TaskType,
    ) -> StrataResult<Vec<String>> {
        Err(LlmError::JudgeFailed {
            reason: "judge unavailable".to_string(),
        }
        .into())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Strata types.

    use super::*;
    use proptest::prelude::*;
    use strata_core::OutlierMethod;

    pub fn arb_role() -> impl Strategy<Value = NodeRole> {
        prop_oneof![
            Just(NodeRole::User),
            Just(NodeRole::Assistant),
            Just(NodeRole::System),
        ]
    }

    pub fn arb_phase() -> impl Strategy<Value = ConversationPhase> {
        prop_oneof![
            Just(ConversationPhase::Exploration),
            Just(ConversationPhase::Planning),
            Just(ConversationPhase::Implementation),
            Just(ConversationPhase::Review),
            Just(ConversationPhase::Debugging),
        ]
    }

    pub fn arb_task_type() -> impl Strategy<Value = TaskType> {
        prop_oneof![
            Just(TaskType::Code),
            Just(TaskType::Documentation),
            Just(TaskType::Planning),
            Just(TaskType::Debugging),
            Just(TaskType::General),
        ]
    }

    pub fn arb_outlier_method() -> impl Strategy<Value = OutlierMethod> {
        prop_oneof![
            Just(OutlierMethod::ZScore),
            Just(OutlierMethod::Mad),
            Just(OutlierMethod::Iqr),
        ]
    }

    /// A node to insert under the current head, without an explicit parent.
    pub fn arb_new_node() -> impl Strategy<Value = NewNode> {
        (
            arb_role(),
            "[a-zA-Z0-9 .,]{1,200}",
            arb_phase(),
            0.0f32..=1.0,
            prop::option::of("[a-z]{1,4}"),
        )
            .prop_map(|(role, content, phase, importance, task)| {
                let node = NewNode::new(role, content)
                    .with_phase(phase)
                    .with_importance(importance);
                match task {
                    Some(task) => node.with_tasks([task]),
                    None => node,
                }
            })
    }

    /// Valid resolution configs with monotonic distances.
    pub fn arb_resolution_config() -> impl Strategy<Value = ResolutionConfig> {
        (0usize..4, 0usize..4, 0usize..6, 1i32..20_000, 0.0f32..=1.0).prop_map(
            |(full, summary_gap, title_gap, budget, importance)| {
                let summary = full + summary_gap;
                ResolutionConfig {
                    full_context_distance: full,
                    summary_distance: summary,
                    title_distance: summary + title_gap,
                    target_context_size: budget,
                    importance_threshold: importance,
                    ..ResolutionConfig::balanced()
                }
            },
        )
    }

    /// A batch of similarity scores.
    pub fn arb_score_batch(max_len: usize) -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(0.0f32..=1.0, 0..max_len)
    }

    pub fn arb_chunk() -> impl Strategy<Value = ContextChunk> {
        ("[a-z0-9]{4,8}", "[a-z ]{0,80}", 0.0f32..=1.0)
            .prop_map(|(id, content, similarity)| ContextChunk::new(id, content, similarity))
    }

    /// Feedback over `n` chunk ids `c0..cn`.
    pub fn arb_feedback(n: usize) -> impl Strategy<Value = ChunkFeedback> {
        (
            prop::collection::vec(any::<bool>(), n),
            prop::option::of("[a-z ]{1,20}"),
            0usize..=n,
        )
            .prop_map(move |(useful, missing_context, unnecessary)| {
                let chunk_ids: Vec<String> = (0..n).map(|i| format!("c{}", i)).collect();
                ChunkFeedback {
                    unnecessary_chunk_ids: chunk_ids.iter().take(unnecessary).cloned().collect(),
                    chunk_ids,
                    useful,
                    missing_context,
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built graphs and batches.

    use super::*;

    fn turn_content(i: usize) -> String {
        format!("Turn {}: working through step {} of the migration.", i, i)
    }

    /// `len` nodes linked parent to child, alternating user and assistant.
    /// The last node is current.
    pub fn linear_chain(len: usize) -> (HistoryGraph, Vec<NodeId>) {
        let mut graph = HistoryGraph::new();
        let mut ids = Vec::with_capacity(len);
        for i in 0..len {
            let node = if i % 2 == 0 {
                NewNode::user(turn_content(i))
            } else {
                NewNode::assistant(turn_content(i))
            };
            if let Ok(id) = graph.add_node(node) {
                ids.push(id);
            }
        }
        (graph, ids)
    }

    /// Complete tree of the given depth where every node has `fanout`
    /// children. Returns ids breadth-first; the root is current.
    pub fn branching_tree(depth: usize, fanout: usize) -> (HistoryGraph, Vec<NodeId>) {
        let mut graph = HistoryGraph::new();
        let mut ids = Vec::new();
        let Ok(root) = graph.add_node(NewNode::user(turn_content(0))) else {
            return (graph, ids);
        };
        ids.push(root);

        let mut frontier = vec![root];
        for _ in 0..depth {
            let mut next = Vec::with_capacity(frontier.len() * fanout);
            for parent in frontier {
                for _ in 0..fanout {
                    let content = turn_content(ids.len());
                    if let Ok(id) = graph.add_node(NewNode::assistant(content).with_parent(parent)) {
                        ids.push(id);
                        next.push(id);
                    }
                }
            }
            frontier = next;
        }
        graph.set_current(root);
        (graph, ids)
    }

    /// Distances 2/4/6 over an 8-node chain headed at the last node.
    pub fn scenario_a() -> (HistoryGraph, Vec<NodeId>, ResolutionConfig) {
        let config = ResolutionConfig {
            full_context_distance: 2,
            summary_distance: 4,
            title_distance: 6,
            ..ResolutionConfig::balanced()
        };
        let (graph, ids) = linear_chain(8);
        (graph, ids, config)
    }

    /// Ten descending similarity scores with a soft tail.
    pub fn scenario_b_scores() -> Vec<f32> {
        vec![0.95, 0.88, 0.82, 0.75, 0.71, 0.65, 0.58, 0.45, 0.38, 0.25]
    }

    /// Chunks `c0..cn` with the given similarities.
    pub fn chunks_with_scores(scores: &[f32]) -> Vec<ContextChunk> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                ContextChunk::new(format!("c{}", i), format!("retrieved passage {}", i), *s)
                    .with_metadata("rank", serde_json::json!(i))
            })
            .collect()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Invariant checks shared by graph tests.

    use super::*;
    use std::collections::BTreeSet;

    /// Every child lists its parent and exactly the parentless nodes are roots.
    pub fn assert_tree_invariant(graph: &HistoryGraph) {
        for node in graph.nodes() {
            if let Some(pid) = node.parent_id {
                let parent = graph
                    .node(&pid)
                    .unwrap_or_else(|| panic!("parent {} of {} missing", pid, node.node_id));
                assert!(
                    parent.children_ids.contains(&node.node_id),
                    "parent {} does not list child {}",
                    pid,
                    node.node_id
                );
            }
        }
        let parentless: BTreeSet<NodeId> = graph
            .nodes()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.node_id)
            .collect();
        let roots: BTreeSet<NodeId> = graph.roots().copied().collect();
        assert_eq!(parentless, roots, "root set does not match parentless nodes");
    }

    pub fn assert_llm_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        assert!(
            matches!(result, Err(StrataError::Llm(_))),
            "expected LLM error, got {:?}",
            result
        );
    }
}


#[cfg(test)]
mod prop_tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_configs_validate(config in arb_resolution_config()) {
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_generated_nodes_keep_tree_invariant(
            nodes in prop::collection::vec(arb_new_node(), 1..20),
            branch_points in prop::collection::vec(any::<prop::sample::Index>(), 0..5),
        ) {
            let mut graph = HistoryGraph::new();
            let mut ids = Vec::new();
            for (i, node) in nodes.into_iter().enumerate() {
                if let Some(index) = branch_points.get(i % 7) {
                    if !ids.is_empty() {
                        graph.set_current(ids[index.index(ids.len())]);
                    }
                }
                ids.push(graph.add_node(node).unwrap());
            }
            assertions::assert_tree_invariant(&graph);
            prop_assert_eq!(graph.len(), ids.len());
        }

        #[test]
        fn prop_feedback_is_parallel(feedback in arb_feedback(6)) {
            prop_assert_eq!(feedback.chunk_ids.len(), feedback.useful.len());
            prop_assert!(feedback.unnecessary_chunk_ids.len() <= feedback.chunk_ids.len());
        }

        #[test]
        fn prop_score_batches_in_unit_range(scores in arb_score_batch(50)) {
            prop_assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        }
    }
}
