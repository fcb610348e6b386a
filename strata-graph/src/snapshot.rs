//! JSON snapshots of a history graph

use crate::graph::HistoryGraph;
use crate::node::{Checkpoint, Community, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use strata_core::{NodeId, PersistenceError, StrataResult};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable form of a whole graph, one per conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub current_node_id: Option<NodeId>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub communities: Vec<Community>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl HistoryGraph {
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            current_node_id: self.current,
            nodes: self.nodes.values().cloned().collect(),
            communities: self.communities.values().cloned().collect(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// Adjacency is repaired so the tree invariant holds: a node whose parent
    /// is missing becomes a root, every child is listed by its parent, and
    /// child ids that do not point back are dropped. Community and checkpoint
    /// members that no longer exist are removed.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut nodes: BTreeMap<NodeId, Node> = snapshot
            .nodes
            .into_iter()
            .map(|n| (n.node_id, n))
            .collect();

        let ids: Vec<NodeId> = nodes.keys().copied().collect();
        let mut orphaned = 0usize;
        for id in &ids {
            let parent = nodes.get(id).and_then(|n| n.parent_id);
            if let Some(pid) = parent {
                if !nodes.contains_key(&pid) || pid == *id {
                    orphaned += 1;
                    if let Some(node) = nodes.get_mut(id) {
                        node.parent_id = None;
                    }
                }
            }
        }
        if orphaned > 0 {
            tracing::warn!(orphaned, "Snapshot nodes referenced missing parents");
        }

        // Children must point back at their parent.
        let parents: BTreeMap<NodeId, Option<NodeId>> =
            nodes.iter().map(|(id, n)| (*id, n.parent_id)).collect();
        for (id, node) in nodes.iter_mut() {
            let mut seen = HashSet::new();
            node.children_ids
                .retain(|c| parents.get(c) == Some(&Some(*id)) && seen.insert(*c));
        }
        for (child, parent) in &parents {
            if let Some(pid) = parent {
                if let Some(p) = nodes.get_mut(pid) {
                    if !p.children_ids.contains(child) {
                        p.children_ids.push(*child);
                    }
                }
            }
        }

        let roots: BTreeSet<NodeId> = nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.node_id)
            .collect();

        let communities = snapshot
            .communities
            .into_iter()
            .map(|mut c| {
                c.node_ids.retain(|id| nodes.contains_key(id));
                (c.community_id, c)
            })
            .collect();

        let checkpoints = snapshot
            .checkpoints
            .into_iter()
            .map(|mut cp| {
                cp.node_ids.retain(|id| nodes.contains_key(id));
                cp
            })
            .collect();

        let current = snapshot.current_node_id.filter(|id| nodes.contains_key(id));

        Self {
            nodes,
            roots,
            communities,
            checkpoints,
            current,
            distance_cache: Default::default(),
        }
    }

    /// Write the graph as pretty JSON.
    pub fn save_json(&self, path: &Path) -> StrataResult<()> {
        let json = serde_json::to_string_pretty(&self.to_snapshot())
            .map_err(PersistenceError::from)?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, &e))?;
            }
        }
        std::fs::write(path, json).map_err(|e| PersistenceError::io(path, &e))?;
        tracing::debug!(path = %path.display(), nodes = self.len(), "Saved graph snapshot");
        Ok(())
    }

    /// Read a graph written by [`save_json`](Self::save_json).
    pub fn load_json(path: &Path) -> StrataResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| PersistenceError::io(path, &e))?;
        let snapshot: GraphSnapshot = serde_json::from_str(&json).map_err(PersistenceError::from)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewNode;
    use strata_core::{new_id, CheckpointType, StrataError};
    use tempfile::TempDir;

    fn sample() -> HistoryGraph {
        let mut graph = HistoryGraph::new();
        let a = graph.add_node(NewNode::user("a").with_tasks(["t1"])).unwrap();
        let b = graph.add_node(NewNode::assistant("b").with_tasks(["t1", "t2"])).unwrap();
        graph.add_node(NewNode::user("c")).unwrap();
        graph.add_node(NewNode::user("d").with_parent(a)).unwrap();
        graph.update_summary(&b, "summary of b".into(), 3);
        graph.create_checkpoint(&[a, b], CheckpointType::Decision, "t", "s", "r");
        graph
    }

    fn adjacency(graph: &HistoryGraph) -> Vec<(NodeId, Option<NodeId>, Vec<NodeId>)> {
        graph
            .nodes()
            .map(|n| (n.node_id, n.parent_id, n.children_ids.clone()))
            .collect()
    }

    #[test]
    fn test_snapshot_round_trip() {
        let graph = sample();
        let restored = HistoryGraph::from_snapshot(graph.to_snapshot());
        assert_eq!(adjacency(&graph), adjacency(&restored));
        assert_eq!(graph.roots, restored.roots);
        assert_eq!(graph.current_node_id(), restored.current_node_id());
        assert_eq!(
            graph.communities().collect::<Vec<_>>(),
            restored.communities().collect::<Vec<_>>()
        );
        assert_eq!(graph.checkpoints(), restored.checkpoints());
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("graph.json");
        let graph = sample();
        graph.save_json(&path).unwrap();
        let restored = HistoryGraph::load_json(&path).unwrap();
        assert_eq!(graph.to_snapshot(), restored.to_snapshot());
    }

    #[test]
    fn test_load_missing_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let err = HistoryGraph::load_json(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StrataError::Persistence(PersistenceError::Io { .. })));
    }

    #[test]
    fn test_from_snapshot_repairs_adjacency() {
        let graph = sample();
        let mut snapshot = graph.to_snapshot();
        let stray = new_id();
        // Drop the root and add a dangling child reference.
        let root_pos = snapshot
            .nodes
            .iter()
            .position(|n| n.parent_id.is_none())
            .unwrap();
        let root = snapshot.nodes.remove(root_pos);
        snapshot.nodes[0].children_ids.push(stray);

        let restored = HistoryGraph::from_snapshot(snapshot);
        assert!(!restored.contains(&root.node_id));
        for node in restored.nodes() {
            assert!(!node.children_ids.contains(&stray));
            match node.parent_id {
                Some(pid) => assert!(restored.node(&pid).unwrap().children_ids.contains(&node.node_id)),
                None => assert!(restored.roots.contains(&node.node_id)),
            }
        }
        for community in restored.communities() {
            assert!(!community.contains(&root.node_id));
        }
    }
}
