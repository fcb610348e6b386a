//! Compiled context window

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use strata_core::{truncate_to_token_budget, CommunityId, NodeId, ResolutionTier};
use strata_graph::HistoryGraph;

/// How one selected node was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionDecision {
    pub node_id: NodeId,
    pub distance: usize,
    /// Tier allowed by the non-budget strategies
    pub requested: ResolutionTier,
    /// Tier the token budget paid for
    pub budget_tier: ResolutionTier,
    /// Minimum of `requested` and `budget_tier`
    pub tier: ResolutionTier,
    /// Tokens the node occupies when rendered at `tier`
    pub tokens: i32,
    /// Tokens drawn from the budget, hidden nodes included
    pub charged: i32,
}

impl ResolutionDecision {
    /// Whether the token budget lowered the tier.
    pub fn budget_limited(&self) -> bool {
        self.tier < self.requested
    }
}

/// Aggregate metrics for a compiled window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub total_tokens: i32,
    pub node_tokens: i32,
    /// Budget consumed by the allocator
    pub charged_tokens: i32,
    pub community_tokens: i32,
    pub full_count: usize,
    pub summary_count: usize,
    pub title_count: usize,
    pub hidden_count: usize,
    pub compile_time_ms: f64,
}

impl WindowMetrics {
    pub fn count(&self, tier: ResolutionTier) -> usize {
        match tier {
            ResolutionTier::Full => self.full_count,
            ResolutionTier::Summary => self.summary_count,
            ResolutionTier::Title => self.title_count,
            ResolutionTier::Hidden => self.hidden_count,
        }
    }

    pub(crate) fn record(&mut self, tier: ResolutionTier) {
        match tier {
            ResolutionTier::Full => self.full_count += 1,
            ResolutionTier::Summary => self.summary_count += 1,
            ResolutionTier::Title => self.title_count += 1,
            ResolutionTier::Hidden => self.hidden_count += 1,
        }
    }
}

/// Output of a compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub current_node_id: NodeId,
    /// Visible nodes in selection order
    pub nodes: Vec<NodeId>,
    /// Tier of every selected node, hidden ones included
    pub resolutions: BTreeMap<NodeId, ResolutionTier>,
    pub communities: Vec<CommunityId>,
    /// Per-node trace in selection order
    pub decisions: Vec<ResolutionDecision>,
    pub metrics: WindowMetrics,
    /// Budget the window was compiled against
    pub max_tokens: i32,
    /// Allowance for rendering a summary-tier node that has no summary
    pub summary_tokens: i32,
    /// Allowance for a title line
    pub title_tokens: i32,
}

impl ContextWindow {
    pub(crate) fn empty(current_node_id: NodeId, max_tokens: i32) -> Self {
        Self {
            current_node_id,
            nodes: Vec::new(),
            resolutions: BTreeMap::new(),
            communities: Vec::new(),
            decisions: Vec::new(),
            metrics: WindowMetrics::default(),
            max_tokens,
            summary_tokens: 0,
            title_tokens: 0,
        }
    }

    pub fn tier(&self, node_id: &NodeId) -> Option<ResolutionTier> {
        self.resolutions.get(node_id).copied()
    }

    /// Visible nodes at the given tier, in selection order.
    pub fn nodes_at(&self, tier: ResolutionTier) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|id| self.tier(id) == Some(tier))
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Prompt text for the window.
    ///
    /// Community summaries come first, then visible nodes in chronological
    /// order: FULL verbatim, SUMMARY as the summary (or truncated body),
    /// TITLE as a single line.
    pub fn render(&self, graph: &HistoryGraph) -> String {
        let mut out = String::new();

        for community in self.communities.iter().filter_map(|id| graph.community(id)) {
            if let Some(summary) = &community.summary {
                let _ = writeln!(out, "[Community: {}] {}", community.name, summary);
            }
        }
        if !self.communities.is_empty() && !out.is_empty() {
            out.push('\n');
        }

        let mut visible: Vec<_> = self.nodes.iter().filter_map(|id| graph.node(id)).collect();
        visible.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        for node in visible {
            match self.tier(&node.node_id) {
                Some(ResolutionTier::Full) => {
                    let _ = writeln!(out, "[{}] {}", node.role, node.content);
                }
                Some(ResolutionTier::Summary) => {
                    let body = match &node.summary {
                        Some(summary) => summary.clone(),
                        None => truncate_to_token_budget(&node.content, self.summary_tokens),
                    };
                    let _ = writeln!(out, "[{} summary] {}", node.role, body);
                }
                Some(ResolutionTier::Title) => {
                    let _ = writeln!(out, "[{} title] {}", node.role, node.title(self.title_tokens));
                }
                Some(ResolutionTier::Hidden) | None => {}
            }
        }
        out
    }
}
