//! History graph arena and mutation operations

use crate::node::{Checkpoint, Community, NewNode, Node};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use strata_core::{
    community_id_for_task, new_id, CheckpointId, CheckpointType, CommunityId, GraphError, NodeId,
    StrataResult, TaskId,
};

/// Conversation history as an arena of nodes keyed by id.
///
/// Structural mutations clear the distance cache in full.
#[derive(Debug, Default)]
pub struct HistoryGraph {
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) roots: BTreeSet<NodeId>,
    pub(crate) communities: BTreeMap<CommunityId, Community>,
    pub(crate) checkpoints: Vec<Checkpoint>,
    pub(crate) current: Option<NodeId>,
    /// Symmetric pair -> edge distance
    pub(crate) distance_cache: Mutex<HashMap<(NodeId, NodeId), i64>>,
}

/// Aggregate counts over a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub root_count: usize,
    pub community_count: usize,
    pub checkpoint_count: usize,
    pub summarized_count: usize,
    pub total_tokens: i64,
    pub max_depth: usize,
}

impl HistoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in id order, which is creation order for generated ids.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &NodeId> {
        self.roots.iter()
    }

    pub fn current_node_id(&self) -> Option<NodeId> {
        self.current
    }

    pub fn community(&self, id: &CommunityId) -> Option<&Community> {
        self.communities.get(id)
    }

    pub fn communities(&self) -> impl Iterator<Item = &Community> {
        self.communities.values()
    }

    /// Community created for a task, if any node declared it.
    pub fn community_for_task(&self, task_id: &str) -> Option<&Community> {
        self.communities.get(&community_id_for_task(task_id))
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Every node id referenced by any checkpoint.
    pub fn checkpointed_node_ids(&self) -> HashSet<NodeId> {
        self.checkpoints
            .iter()
            .flat_map(|cp| cp.node_ids.iter().copied())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Node mutation
    // ------------------------------------------------------------------------

    /// Insert a node and make it current.
    ///
    /// The parent defaults to the current node. Each declared task gets a
    /// community (created on first use); the first task is the node's
    /// primary community.
    pub fn add_node(&mut self, new_node: NewNode) -> StrataResult<NodeId> {
        let parent_id = match new_node.parent_id {
            Some(pid) if !self.nodes.contains_key(&pid) => {
                return Err(GraphError::ParentNotFound { id: pid }.into());
            }
            Some(pid) => Some(pid),
            None => self.current.filter(|id| self.nodes.contains_key(id)),
        };

        let mut task_ids: Vec<TaskId> = Vec::with_capacity(new_node.task_ids.len());
        for task in &new_node.task_ids {
            if !task.is_empty() && !task_ids.contains(task) {
                task_ids.push(task.clone());
            }
        }

        let node_id = new_id();
        for task in &task_ids {
            self.ensure_task_community(task).insert(node_id);
        }
        let community_id = task_ids.first().map(|t| community_id_for_task(t));

        let node = new_node.into_node(node_id, parent_id, task_ids, community_id);
        match parent_id {
            Some(pid) => {
                if let Some(parent) = self.nodes.get_mut(&pid) {
                    parent.children_ids.push(node_id);
                }
            }
            None => {
                self.roots.insert(node_id);
            }
        }

        tracing::debug!(
            node_id = %node_id,
            parent_id = ?parent_id,
            tokens = node.token_count,
            "Added history node"
        );
        self.nodes.insert(node_id, node);
        self.current = Some(node_id);
        self.invalidate_distance_cache();
        Ok(node_id)
    }

    /// Move the current pointer, e.g. to branch from an earlier turn.
    pub fn set_current(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        self.current = Some(id);
        true
    }

    /// Count a read of the node.
    pub fn record_access(&mut self, id: &NodeId) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.access_count += 1;
                node.last_accessed = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Store a new summary and bump the node's summary version.
    pub fn update_summary(&mut self, id: &NodeId, summary: String, summary_tokens: i32) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.summary = Some(summary);
                node.summary_tokens = summary_tokens.max(0);
                node.summary_version += 1;
                node.last_summarized = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Communities
    // ------------------------------------------------------------------------

    fn ensure_task_community(&mut self, task_id: &str) -> &mut Community {
        let community_id = community_id_for_task(task_id);
        self.communities.entry(community_id).or_insert_with(|| {
            tracing::debug!(task_id, community_id = %community_id, "Created task community");
            Community::new(
                community_id,
                format!("task:{}", task_id),
                task_id,
                Some(task_id.to_string()),
            )
        })
    }

    /// Create a community over existing nodes.
    ///
    /// Unknown node ids are dropped. A task-scoped community reuses the
    /// task's derived id and merges into it when it already exists.
    pub fn create_community(
        &mut self,
        name: impl Into<String>,
        theme: impl Into<String>,
        node_ids: &[NodeId],
        task_id: Option<TaskId>,
    ) -> CommunityId {
        let community_id = match &task_id {
            Some(task) => community_id_for_task(task),
            None => new_id(),
        };
        let name = name.into();
        let theme = theme.into();
        let community = self
            .communities
            .entry(community_id)
            .or_insert_with(|| Community::new(community_id, name, theme, task_id));

        for id in node_ids {
            match self.nodes.get_mut(id) {
                Some(node) => {
                    community.insert(*id);
                    if node.community_id.is_none() {
                        node.community_id = Some(community_id);
                    }
                }
                None => {
                    tracing::warn!(node_id = %id, community_id = %community_id, "Skipping unknown node for community");
                }
            }
        }
        community_id
    }

    pub fn add_to_community(&mut self, community_id: &CommunityId, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        let Some(community) = self.communities.get_mut(community_id) else {
            return false;
        };
        if node.community_id.is_none() {
            node.community_id = Some(*community_id);
        }
        community.insert(node_id)
    }

    pub fn remove_from_community(&mut self, community_id: &CommunityId, node_id: &NodeId) -> bool {
        let Some(community) = self.communities.get_mut(community_id) else {
            return false;
        };
        let removed = community.remove(node_id);
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.community_id == Some(*community_id) {
                node.community_id = None;
            }
        }
        removed
    }

    /// Nest `child` under `parent`, detaching it from any previous parent.
    pub fn set_parent_community(&mut self, child: &CommunityId, parent: &CommunityId) -> bool {
        if child == parent
            || !self.communities.contains_key(child)
            || !self.communities.contains_key(parent)
            || self.community_is_ancestor(child, parent)
        {
            return false;
        }

        let previous = self
            .communities
            .get(child)
            .and_then(|c| c.parent_community_id);
        if let Some(old) = previous {
            if let Some(old_parent) = self.communities.get_mut(&old) {
                old_parent.sub_community_ids.retain(|id| id != child);
            }
        }
        if let Some(parent_community) = self.communities.get_mut(parent) {
            if !parent_community.sub_community_ids.contains(child) {
                parent_community.sub_community_ids.push(*child);
            }
            parent_community.last_updated = Utc::now();
        }
        if let Some(child_community) = self.communities.get_mut(child) {
            child_community.parent_community_id = Some(*parent);
            child_community.last_updated = Utc::now();
        }
        true
    }

    /// Whether `candidate` sits above `of` in the community hierarchy.
    fn community_is_ancestor(&self, candidate: &CommunityId, of: &CommunityId) -> bool {
        let mut cursor = self.communities.get(of).and_then(|c| c.parent_community_id);
        let mut seen = HashSet::new();
        while let Some(id) = cursor {
            if id == *candidate {
                return true;
            }
            if !seen.insert(id) {
                return false;
            }
            cursor = self.communities.get(&id).and_then(|c| c.parent_community_id);
        }
        false
    }

    /// Replace a community's rollup summaries.
    pub fn set_community_summary(
        &mut self,
        community_id: &CommunityId,
        summary: String,
        detailed_summary: Option<String>,
    ) -> bool {
        match self.communities.get_mut(community_id) {
            Some(community) => {
                community.summary = Some(summary);
                if detailed_summary.is_some() {
                    community.detailed_summary = detailed_summary;
                }
                community.last_updated = Utc::now();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------------

    /// Record a checkpoint over existing nodes.
    ///
    /// Returns `None` when none of the ids exist.
    pub fn create_checkpoint(
        &mut self,
        node_ids: &[NodeId],
        checkpoint_type: CheckpointType,
        title: impl Into<String>,
        summary: impl Into<String>,
        importance_reason: impl Into<String>,
    ) -> Option<CheckpointId> {
        let members: Vec<NodeId> = node_ids
            .iter()
            .copied()
            .filter(|id| self.nodes.contains_key(id))
            .collect();
        if members.is_empty() {
            tracing::warn!(requested = node_ids.len(), "Checkpoint has no known nodes");
            return None;
        }

        let checkpoint_id = new_id();
        self.checkpoints.push(Checkpoint {
            checkpoint_id,
            node_ids: members,
            checkpoint_type,
            title: title.into(),
            summary: summary.into(),
            importance_reason: importance_reason.into(),
            created_at: Utc::now(),
        });
        Some(checkpoint_id)
    }

    // ------------------------------------------------------------------------
    // Stats & cache
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> GraphStats {
        let max_depth = self
            .nodes
            .keys()
            .filter(|id| {
                self.nodes
                    .get(*id)
                    .is_some_and(|n| n.children_ids.is_empty())
            })
            .map(|id| self.get_ancestors(id, None).len())
            .max()
            .unwrap_or(0);

        GraphStats {
            node_count: self.nodes.len(),
            root_count: self.roots.len(),
            community_count: self.communities.len(),
            checkpoint_count: self.checkpoints.len(),
            summarized_count: self.nodes.values().filter(|n| n.is_summarized()).count(),
            total_tokens: self.nodes.values().map(|n| n.token_count as i64).sum(),
            max_depth,
        }
    }

    pub(crate) fn invalidate_distance_cache(&self) {
        if let Ok(mut cache) = self.distance_cache.lock() {
            cache.clear();
        }
    }

    pub(crate) fn cached_distance(&self, key: &(NodeId, NodeId)) -> Option<i64> {
        self.distance_cache.lock().ok()?.get(key).copied()
    }

    pub(crate) fn cache_distance(&self, key: (NodeId, NodeId), distance: i64) {
        if let Ok(mut cache) = self.distance_cache.lock() {
            cache.insert(key, distance);
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_pairs(&self) -> usize {
        self.distance_cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ConversationPhase, StrataError};

    fn chain(graph: &mut HistoryGraph, n: usize) -> Vec<NodeId> {
        (0..n)
            .map(|i| graph.add_node(NewNode::user(format!("turn {}", i))).unwrap())
            .collect()
    }

    #[test]
    fn test_add_node_links_to_current() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 3);
        assert_eq!(graph.current_node_id(), Some(ids[2]));
        assert_eq!(graph.node(&ids[1]).unwrap().parent_id, Some(ids[0]));
        assert_eq!(graph.node(&ids[0]).unwrap().children_ids, vec![ids[1]]);
        assert_eq!(graph.roots().copied().collect::<Vec<_>>(), vec![ids[0]]);
    }

    #[test]
    fn test_add_node_explicit_parent_branches() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 3);
        let branch = graph
            .add_node(NewNode::assistant("alt").with_parent(ids[0]))
            .unwrap();
        assert_eq!(graph.node(&ids[0]).unwrap().children_ids, vec![ids[1], branch]);
        assert_eq!(graph.current_node_id(), Some(branch));
    }

    #[test]
    fn test_add_node_missing_parent_is_error() {
        let mut graph = HistoryGraph::new();
        let missing = new_id();
        let err = graph
            .add_node(NewNode::user("x").with_parent(missing))
            .unwrap_err();
        assert_eq!(
            err,
            StrataError::Graph(GraphError::ParentNotFound { id: missing })
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn test_task_communities_created_lazily() {
        let mut graph = HistoryGraph::new();
        let a = graph
            .add_node(NewNode::user("a").with_tasks(["t1", "t2"]))
            .unwrap();
        let b = graph.add_node(NewNode::user("b").with_tasks(["t1"])).unwrap();

        assert_eq!(graph.communities().count(), 2);
        let t1 = graph.community_for_task("t1").unwrap();
        assert_eq!(t1.node_ids, vec![a, b]);
        assert_eq!(graph.community_for_task("t2").unwrap().node_ids, vec![a]);

        let node = graph.node(&a).unwrap();
        assert_eq!(node.community_id, Some(community_id_for_task("t1")));
        assert_eq!(node.related_task_ids, vec!["t2".to_string()]);
    }

    #[test]
    fn test_create_community_filters_unknown_ids() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 2);
        let cid = graph.create_community("auth", "authentication", &[ids[0], new_id(), ids[1]], None);
        assert_eq!(graph.community(&cid).unwrap().node_ids, ids);
    }

    #[test]
    fn test_remove_from_community_clears_primary() {
        let mut graph = HistoryGraph::new();
        let id = graph.add_node(NewNode::user("a").with_tasks(["t"])).unwrap();
        let cid = community_id_for_task("t");
        assert!(graph.remove_from_community(&cid, &id));
        assert!(graph.node(&id).unwrap().community_id.is_none());
        assert!(graph.community(&cid).unwrap().node_ids.is_empty());
    }

    #[test]
    fn test_set_parent_community_rejects_cycles() {
        let mut graph = HistoryGraph::new();
        let a = graph.create_community("a", "a", &[], None);
        let b = graph.create_community("b", "b", &[], None);
        assert!(graph.set_parent_community(&b, &a));
        assert!(!graph.set_parent_community(&a, &b));
        assert_eq!(graph.community(&a).unwrap().sub_community_ids, vec![b]);
        assert_eq!(graph.community(&b).unwrap().parent_community_id, Some(a));
    }

    #[test]
    fn test_update_summary_bumps_version() {
        let mut graph = HistoryGraph::new();
        let id = graph.add_node(NewNode::user("long text")).unwrap();
        assert!(graph.update_summary(&id, "short".into(), 2));
        assert!(graph.update_summary(&id, "shorter".into(), 2));
        let node = graph.node(&id).unwrap();
        assert_eq!(node.summary_version, 2);
        assert!(node.last_summarized.is_some());
        assert!(!graph.update_summary(&new_id(), "x".into(), 1));
    }

    #[test]
    fn test_record_access() {
        let mut graph = HistoryGraph::new();
        let id = graph.add_node(NewNode::user("a")).unwrap();
        assert!(graph.record_access(&id));
        assert!(graph.record_access(&id));
        assert_eq!(graph.node(&id).unwrap().access_count, 2);
    }

    #[test]
    fn test_checkpoint_requires_known_nodes() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 2);
        assert!(graph
            .create_checkpoint(&[new_id()], CheckpointType::Milestone, "t", "s", "r")
            .is_none());
        let cp = graph
            .create_checkpoint(&ids, CheckpointType::Decision, "Chose design", "s", "key decision")
            .unwrap();
        assert_eq!(graph.checkpoints()[0].checkpoint_id, cp);
        assert_eq!(graph.checkpointed_node_ids().len(), 2);
    }

    #[test]
    fn test_stats() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 4);
        graph.update_summary(&ids[0], "s".into(), 1);
        graph
            .add_node(
                NewNode::user("side")
                    .with_parent(ids[1])
                    .with_phase(ConversationPhase::Debugging),
            )
            .unwrap();
        let stats = graph.stats();
        assert_eq!(stats.node_count, 5);
        assert_eq!(stats.root_count, 1);
        assert_eq!(stats.summarized_count, 1);
        assert_eq!(stats.max_depth, 3);
    }

    #[test]
    fn test_mutation_clears_distance_cache() {
        let mut graph = HistoryGraph::new();
        let ids = chain(&mut graph, 3);
        assert_eq!(graph.calculate_distance(&ids[0], &ids[2]), 2);
        assert_eq!(graph.cached_pairs(), 1);
        graph.add_node(NewNode::user("next")).unwrap();
        assert_eq!(graph.cached_pairs(), 0);
    }
}
