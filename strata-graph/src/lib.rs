//! Strata Graph - Conversation History
//!
//! An arena of history nodes with parent/child links stored as ids, task
//! communities, immutable checkpoints, cached distance queries and JSON
//! snapshots.

mod graph;
mod node;
mod snapshot;
mod traversal;

pub use graph::{GraphStats, HistoryGraph};
pub use node::{Checkpoint, Community, NewNode, Node};
pub use snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
pub use traversal::DEFAULT_PRUNE_IMPORTANCE;
