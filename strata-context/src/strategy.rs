//! Resolution strategies
//!
//! A strategy maps a node and its distance from the current node to a
//! [`ResolutionTier`]. All strategies except [`TokenBudgetStrategy`] are pure.
//! The budget strategy carries a running balance and must be evaluated last,
//! once per node, in the compiler's visitation order.

use std::cell::Cell;
use std::collections::HashSet;
use strata_core::{NodeId, ResolutionConfig, ResolutionTier};
use strata_graph::Node;

/// Maps a node at a distance to the detail tier it should keep.
pub trait ResolutionStrategy {
    fn name(&self) -> &'static str;

    fn evaluate(&self, node: &Node, distance: usize, config: &ResolutionConfig) -> ResolutionTier;
}

/// Tier for a distance given the three cutoffs.
///
/// FULL below `full`, SUMMARY up to `summary`, TITLE up to `title`,
/// HIDDEN beyond.
pub fn tier_for_distance(distance: usize, full: usize, summary: usize, title: usize) -> ResolutionTier {
    if distance < full {
        ResolutionTier::Full
    } else if distance <= summary {
        ResolutionTier::Summary
    } else if distance <= title {
        ResolutionTier::Title
    } else {
        ResolutionTier::Hidden
    }
}

// ============================================================================
// DISTANCE / IMPORTANCE
// ============================================================================

/// Tier from distance alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceBased;

impl ResolutionStrategy for DistanceBased {
    fn name(&self) -> &'static str {
        "distance"
    }

    fn evaluate(&self, _node: &Node, distance: usize, config: &ResolutionConfig) -> ResolutionTier {
        tier_for_distance(
            distance,
            config.full_context_distance,
            config.summary_distance,
            config.title_distance,
        )
    }
}

/// Important nodes get doubled cutoffs; others behave as [`DistanceBased`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportanceBased;

impl ResolutionStrategy for ImportanceBased {
    fn name(&self) -> &'static str {
        "importance"
    }

    fn evaluate(&self, node: &Node, distance: usize, config: &ResolutionConfig) -> ResolutionTier {
        if node.is_important(config.importance_threshold) {
            tier_for_distance(
                distance,
                config.full_context_distance.saturating_mul(2),
                config.summary_distance.saturating_mul(2),
                config.title_distance.saturating_mul(2),
            )
        } else {
            DistanceBased.evaluate(node, distance, config)
        }
    }
}

// ============================================================================
// CHECKPOINT / FOCUS WRAPPERS
// ============================================================================

/// Raises checkpointed nodes: FULL within `summary_distance`, at least
/// SUMMARY beyond it. Other nodes take the inner strategy's tier.
pub struct CheckpointAware {
    checkpointed: HashSet<NodeId>,
    inner: Box<dyn ResolutionStrategy>,
}

impl CheckpointAware {
    pub fn new(checkpointed: HashSet<NodeId>, inner: Box<dyn ResolutionStrategy>) -> Self {
        Self {
            checkpointed,
            inner,
        }
    }
}

impl ResolutionStrategy for CheckpointAware {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn evaluate(&self, node: &Node, distance: usize, config: &ResolutionConfig) -> ResolutionTier {
        let tier = self.inner.evaluate(node, distance, config);
        if !self.checkpointed.contains(&node.node_id) {
            return tier;
        }
        if distance <= config.summary_distance {
            ResolutionTier::Full
        } else {
            tier.max(ResolutionTier::Summary)
        }
    }
}

/// Forces FULL for focus nodes; defers to the inner strategy otherwise.
pub struct FocusStrategy {
    focus: HashSet<NodeId>,
    inner: Box<dyn ResolutionStrategy>,
}

impl FocusStrategy {
    pub fn new(focus: HashSet<NodeId>, inner: Box<dyn ResolutionStrategy>) -> Self {
        Self { focus, inner }
    }
}

impl ResolutionStrategy for FocusStrategy {
    fn name(&self) -> &'static str {
        "focus"
    }

    fn evaluate(&self, node: &Node, distance: usize, config: &ResolutionConfig) -> ResolutionTier {
        if self.focus.contains(&node.node_id) {
            ResolutionTier::Full
        } else {
            self.inner.evaluate(node, distance, config)
        }
    }
}

// ============================================================================
// TOKEN BUDGET
// ============================================================================

/// Greedy allocator over a fixed token budget.
///
/// Built fresh for every compilation. Not `Sync`: the running balance
/// depends on call order.
#[derive(Debug)]
pub struct TokenBudgetStrategy {
    budget: i32,
    remaining: Cell<i32>,
}

impl TokenBudgetStrategy {
    pub fn new(budget: i32) -> Self {
        let budget = budget.max(0);
        Self {
            budget,
            remaining: Cell::new(budget),
        }
    }

    pub fn budget(&self) -> i32 {
        self.budget
    }

    pub fn remaining(&self) -> i32 {
        self.remaining.get()
    }

    pub fn charged(&self) -> i32 {
        self.budget - self.remaining.get()
    }

    /// Budget charge for `tier`, or `None` when the node has nothing to
    /// show at that tier.
    pub fn cost_at(node: &Node, tier: ResolutionTier, config: &ResolutionConfig) -> Option<i32> {
        match tier {
            ResolutionTier::Full => Some(node.token_count.max(0)),
            ResolutionTier::Summary => node.summary.as_ref().map(|_| node.summary_tokens.max(0)),
            ResolutionTier::Title => Some(config.max_title_tokens.max(0)),
            ResolutionTier::Hidden => Some(0),
        }
    }

    /// Charge the most detailed tier that still fits: FULL, then SUMMARY
    /// when a summary exists, then TITLE, else HIDDEN at no cost.
    ///
    /// Independent of what any other strategy would grant the node.
    /// Returns the tier and the tokens charged.
    pub fn allocate(&self, node: &Node, config: &ResolutionConfig) -> (ResolutionTier, i32) {
        let remaining = self.remaining.get();
        for tier in [
            ResolutionTier::Full,
            ResolutionTier::Summary,
            ResolutionTier::Title,
        ] {
            if let Some(cost) = Self::cost_at(node, tier, config) {
                if cost <= remaining {
                    self.remaining.set(remaining - cost);
                    return (tier, cost);
                }
            }
        }
        (ResolutionTier::Hidden, 0)
    }
}

/// Tokens a node occupies when rendered at `tier`.
///
/// A summary-tier node without a summary renders as its truncated body.
pub fn rendered_cost(node: &Node, tier: ResolutionTier, config: &ResolutionConfig) -> i32 {
    let full = node.token_count.max(0);
    match tier {
        ResolutionTier::Full => full,
        ResolutionTier::Summary => match &node.summary {
            Some(_) => node.summary_tokens.max(0),
            None => full.min(config.default_summary_tokens.max(0)),
        },
        ResolutionTier::Title => full.min(config.max_title_tokens.max(0)),
        ResolutionTier::Hidden => 0,
    }
}

impl ResolutionStrategy for TokenBudgetStrategy {
    fn name(&self) -> &'static str {
        "token_budget"
    }

    fn evaluate(&self, node: &Node, _distance: usize, config: &ResolutionConfig) -> ResolutionTier {
        self.allocate(node, config).0
    }
}
