//! Identity types for Strata entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Node identifier using UUIDv7 for timestamp-sortable IDs.
/// Iterating nodes in id order walks them in creation order.
pub type NodeId = Uuid;

/// Community identifier.
/// Task-scoped communities derive their id from the task id (UUIDv5).
pub type CommunityId = Uuid;

/// Checkpoint identifier (UUIDv7).
pub type CheckpointId = Uuid;

/// Conversation identifier (UUIDv7).
pub type ConversationId = Uuid;

/// Task identifier owned by the external task graph.
pub type TaskId = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for deduplication.
pub type ContentHash = [u8; 32];

/// Namespace for deriving community ids from task ids.
const COMMUNITY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a57_9d3e_4b8a_a0c4_5e7d_13b9_f248);

/// Generate a new UUIDv7 id (timestamp-sortable).
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Derive the community id for a task.
/// The same task id always maps to the same community id.
pub fn community_id_for_task(task_id: &str) -> CommunityId {
    Uuid::new_v5(&COMMUNITY_NAMESPACE, task_id.as_bytes())
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
