//! Traversal, distance and pruning over the history graph

use crate::graph::HistoryGraph;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use strata_core::NodeId;

/// Importance below which stale leaves are pruned.
pub const DEFAULT_PRUNE_IMPORTANCE: f32 = 0.5;

impl HistoryGraph {
    /// Parent and children of a node (undirected adjacency).
    fn neighbors(&self, id: &NodeId) -> Vec<NodeId> {
        match self.nodes.get(id) {
            Some(node) => node
                .parent_id
                .iter()
                .chain(node.children_ids.iter())
                .copied()
                .filter(|n| self.nodes.contains_key(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors of a node in root-to-parent order.
    ///
    /// `max_depth` limits how many levels are walked upward.
    pub fn get_ancestors(&self, id: &NodeId, max_depth: Option<usize>) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let Some(node) = self.nodes.get(id) else {
            return ancestors;
        };
        let limit = max_depth.unwrap_or(usize::MAX);
        let mut seen = HashSet::from([*id]);
        let mut cursor = node.parent_id;
        while let Some(pid) = cursor {
            if ancestors.len() >= limit || !seen.insert(pid) {
                break;
            }
            let Some(parent) = self.nodes.get(&pid) else {
                break;
            };
            ancestors.push(pid);
            cursor = parent.parent_id;
        }
        ancestors.reverse();
        ancestors
    }

    /// Descendants of a node, breadth-first from its children.
    pub fn get_descendants(&self, id: &NodeId, max_depth: Option<usize>) -> Vec<NodeId> {
        let mut descendants = Vec::new();
        let Some(node) = self.nodes.get(id) else {
            return descendants;
        };
        let limit = max_depth.unwrap_or(usize::MAX);
        let mut seen = HashSet::from([*id]);
        let mut queue: VecDeque<(NodeId, usize)> =
            node.children_ids.iter().map(|c| (*c, 1)).collect();

        while let Some((child, depth)) = queue.pop_front() {
            if depth > limit || !seen.insert(child) {
                continue;
            }
            let Some(child_node) = self.nodes.get(&child) else {
                continue;
            };
            descendants.push(child);
            queue.extend(child_node.children_ids.iter().map(|c| (*c, depth + 1)));
        }
        descendants
    }

    /// Path from the root down to `id`, inclusive. Empty for unknown ids.
    pub fn get_conversation_path(&self, id: &NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(id) {
            return Vec::new();
        }
        let mut path = self.get_ancestors(id, None);
        path.push(*id);
        path
    }

    /// Ancestors, the node itself, and its descendants.
    pub fn get_branch(&self, id: &NodeId) -> Vec<NodeId> {
        let mut branch = self.get_conversation_path(id);
        if !branch.is_empty() {
            branch.extend(self.get_descendants(id, None));
        }
        branch
    }

    /// Edge count of the shortest path between two nodes.
    ///
    /// Returns 0 for a node and itself and -1 when either id is unknown or
    /// the nodes are not connected.
    pub fn calculate_distance(&self, a: &NodeId, b: &NodeId) -> i64 {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return -1;
        }
        if a == b {
            return 0;
        }

        let key = if a < b { (*a, *b) } else { (*b, *a) };
        if let Some(distance) = self.cached_distance(&key) {
            return distance;
        }

        let distance = self.bidirectional_search(*a, *b);
        self.cache_distance(key, distance);
        distance
    }

    fn bidirectional_search(&self, a: NodeId, b: NodeId) -> i64 {
        let mut dist_a: HashMap<NodeId, i64> = HashMap::from([(a, 0)]);
        let mut dist_b: HashMap<NodeId, i64> = HashMap::from([(b, 0)]);
        let mut frontier_a = vec![a];
        let mut frontier_b = vec![b];

        while !frontier_a.is_empty() && !frontier_b.is_empty() {
            // Expand the smaller side one full level.
            let (frontier, dist, other) = if frontier_a.len() <= frontier_b.len() {
                (&mut frontier_a, &mut dist_a, &dist_b)
            } else {
                (&mut frontier_b, &mut dist_b, &dist_a)
            };

            let mut next = Vec::new();
            let mut best: Option<i64> = None;
            for id in frontier.drain(..) {
                let d = dist.get(&id).copied().unwrap_or(0);
                for neighbor in self.neighbors(&id) {
                    if let Some(od) = other.get(&neighbor) {
                        let total = d + 1 + od;
                        best = Some(best.map_or(total, |cur| cur.min(total)));
                    }
                    if !dist.contains_key(&neighbor) {
                        dist.insert(neighbor, d + 1);
                        next.push(neighbor);
                    }
                }
            }
            if let Some(best) = best {
                return best;
            }
            *frontier = next;
        }
        -1
    }

    /// Deepest node that is an ancestor of (or equal to) both nodes.
    pub fn find_nearest_common_ancestor(&self, a: &NodeId, b: &NodeId) -> Option<NodeId> {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return None;
        }
        let lineage_a: HashSet<NodeId> = self.get_conversation_path(a).into_iter().collect();
        self.get_conversation_path(b)
            .into_iter()
            .rev()
            .find(|id| lineage_a.contains(id))
    }

    /// Nodes reachable from `id` within `max_distance` edges, bucketed by
    /// distance. Bucket 0 holds `id` itself.
    pub fn get_nodes_by_distance(
        &self,
        id: &NodeId,
        max_distance: usize,
    ) -> BTreeMap<usize, Vec<NodeId>> {
        let mut buckets: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        if !self.nodes.contains_key(id) {
            return buckets;
        }

        let mut seen = HashSet::from([*id]);
        let mut queue = VecDeque::from([(*id, 0usize)]);
        while let Some((node_id, depth)) = queue.pop_front() {
            buckets.entry(depth).or_default().push(node_id);
            if depth == max_distance {
                continue;
            }
            for neighbor in self.neighbors(&node_id) {
                if seen.insert(neighbor) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        buckets
    }

    /// Remove stale, low-importance leaf chains.
    ///
    /// See [`prune_old_branches_with`](Self::prune_old_branches_with).
    pub fn prune_old_branches(&mut self, days: i64) -> Vec<NodeId> {
        self.prune_old_branches_with(days, DEFAULT_PRUNE_IMPORTANCE)
    }

    /// Remove leaves whose last activity is older than `days` and whose
    /// importance is below `importance_floor`, then walk upward removing each
    /// parent left childless that meets the same test. Nodes on the current
    /// conversation path and checkpointed nodes are never removed.
    ///
    /// Returns the removed ids.
    pub fn prune_old_branches_with(&mut self, days: i64, importance_floor: f32) -> Vec<NodeId> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let mut protected: HashSet<NodeId> = self.checkpointed_node_ids();
        if let Some(current) = self.current {
            protected.extend(self.get_conversation_path(&current));
        }

        let prunable = |graph: &HistoryGraph, id: &NodeId| -> bool {
            graph.nodes.get(id).is_some_and(|node| {
                node.children_ids.is_empty()
                    && !protected.contains(id)
                    && node.importance < importance_floor
                    && node.last_activity() < cutoff
            })
        };

        let leaves: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| prunable(self, *id))
            .copied()
            .collect();

        let mut removed = Vec::new();
        for leaf in leaves {
            let mut cursor = Some(leaf);
            while let Some(id) = cursor.take() {
                if !prunable(self, &id) {
                    break;
                }
                let Some(node) = self.nodes.remove(&id) else {
                    break;
                };
                self.roots.remove(&id);
                removed.push(id);

                if let Some(pid) = node.parent_id {
                    if let Some(parent) = self.nodes.get_mut(&pid) {
                        parent.children_ids.retain(|c| *c != id);
                        if parent.children_ids.is_empty() {
                            cursor = Some(pid);
                        }
                    }
                }
            }
        }

        if !removed.is_empty() {
            let gone: HashSet<NodeId> = removed.iter().copied().collect();
            for community in self.communities.values_mut() {
                community.node_ids.retain(|id| !gone.contains(id));
            }
            self.invalidate_distance_cache();
            tracing::info!(pruned = removed.len(), days, "Pruned stale branches");
        }
        removed
    }
}
