//! Node, community and checkpoint entities

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::{
    estimate_tokens, title_line, CheckpointId, CheckpointType, CommunityId, ConversationPhase,
    NodeId, NodeRole, TaskId, Timestamp,
};

// ============================================================================
// NODE
// ============================================================================

/// One turn of history.
///
/// The graph owns every node. `parent_id` and `children_ids` are id
/// references into the graph's arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub created_at: Timestamp,
    pub role: NodeRole,
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Compressed summary, once summarized
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub summary_tokens: i32,
    #[serde(default)]
    pub summary_version: u32,
    #[serde(default)]
    pub last_summarized: Option<Timestamp>,

    /// Token count of the raw content
    pub token_count: i32,
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub children_ids: Vec<NodeId>,

    /// Primary task association
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub related_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub community_id: Option<CommunityId>,

    #[serde(default)]
    pub phase: ConversationPhase,
    /// Importance in [0, 1]
    pub importance: f32,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<Timestamp>,
}

fn default_content_type() -> String {
    "text".to_string()
}

impl Node {
    pub fn is_summarized(&self) -> bool {
        self.summary.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_important(&self, threshold: f32) -> bool {
        self.importance >= threshold
    }

    /// Primary task followed by related tasks.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.task_id.iter().chain(self.related_task_ids.iter())
    }

    /// One-line title for title-tier rendering.
    pub fn title(&self, max_tokens: i32) -> String {
        let source = self.summary.as_deref().unwrap_or(&self.content);
        title_line(source, max_tokens)
    }

    /// Most recent time the node was created, read or summarized.
    pub fn last_activity(&self) -> Timestamp {
        [self.last_accessed, self.last_summarized]
            .into_iter()
            .flatten()
            .fold(self.created_at, |latest, t| latest.max(t))
    }
}

// ============================================================================
// NEW NODE BUILDER
// ============================================================================

/// Input for [`HistoryGraph::add_node`](crate::HistoryGraph::add_node).
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub role: NodeRole,
    pub content: String,
    /// Explicit parent. Defaults to the graph's current node.
    pub parent_id: Option<NodeId>,
    /// First entry is the primary task.
    pub task_ids: Vec<TaskId>,
    pub phase: ConversationPhase,
    pub importance: f32,
    pub content_type: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewNode {
    pub fn new(role: NodeRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parent_id: None,
            task_ids: Vec::new(),
            phase: ConversationPhase::default(),
            importance: 0.5,
            content_type: default_content_type(),
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(NodeRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(NodeRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(NodeRole::System, content)
    }

    pub fn with_parent(mut self, parent_id: NodeId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_tasks<I, S>(mut self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.task_ids = task_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_phase(mut self, phase: ConversationPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub(crate) fn into_node(
        self,
        node_id: NodeId,
        parent_id: Option<NodeId>,
        task_ids: Vec<TaskId>,
        community_id: Option<CommunityId>,
    ) -> Node {
        let mut tasks = task_ids.into_iter();
        let task_id = tasks.next();
        let token_count = estimate_tokens(&self.content);
        Node {
            node_id,
            created_at: Utc::now(),
            role: self.role,
            content: self.content,
            content_type: self.content_type,
            metadata: self.metadata,
            summary: None,
            summary_tokens: 0,
            summary_version: 0,
            last_summarized: None,
            token_count,
            parent_id,
            children_ids: Vec::new(),
            task_id,
            related_task_ids: tasks.collect(),
            community_id,
            phase: self.phase,
            importance: if self.importance.is_finite() {
                self.importance.clamp(0.0, 1.0)
            } else {
                0.5
            },
            access_count: 0,
            last_accessed: None,
        }
    }
}

// ============================================================================
// COMMUNITY
// ============================================================================

/// Named grouping of nodes around a theme.
///
/// Communities reference nodes; they never own them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub community_id: CommunityId,
    pub name: String,
    pub theme: String,
    pub node_ids: Vec<NodeId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub detailed_summary: Option<String>,
    #[serde(default)]
    pub parent_community_id: Option<CommunityId>,
    #[serde(default)]
    pub sub_community_ids: Vec<CommunityId>,
    pub created_at: Timestamp,
    pub last_updated: Timestamp,
}

impl Community {
    pub fn new(
        community_id: CommunityId,
        name: impl Into<String>,
        theme: impl Into<String>,
        task_id: Option<TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            community_id,
            name: name.into(),
            theme: theme.into(),
            node_ids: Vec::new(),
            task_id,
            summary: None,
            detailed_summary: None,
            parent_community_id: None,
            sub_community_ids: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.node_ids.contains(node_id)
    }

    /// Add a member. Returns false if it was already present.
    pub(crate) fn insert(&mut self, node_id: NodeId) -> bool {
        if self.contains(&node_id) {
            return false;
        }
        self.node_ids.push(node_id);
        self.last_updated = Utc::now();
        true
    }

    pub(crate) fn remove(&mut self, node_id: &NodeId) -> bool {
        let before = self.node_ids.len();
        self.node_ids.retain(|id| id != node_id);
        let removed = self.node_ids.len() != before;
        if removed {
            self.last_updated = Utc::now();
        }
        removed
    }
}

// ============================================================================
// CHECKPOINT
// ============================================================================

/// Immutable marker over a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub node_ids: Vec<NodeId>,
    pub checkpoint_type: CheckpointType,
    pub title: String,
    pub summary: String,
    pub importance_reason: String,
    pub created_at: Timestamp,
}
