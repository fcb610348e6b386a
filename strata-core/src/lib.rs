//! Strata Core - Shared Types
//!
//! Identity types, enums, configuration, the error taxonomy and the small
//! value types shared by every other Strata crate. No I/O beyond config file
//! loading lives here.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod enums;
pub mod error;
pub mod identity;
pub mod tokens;

pub use chunk::{ChunkFeedback, ContextChunk, RetrievalResult};
pub use config::{bound_threshold, GateConfig, ResolutionConfig};
pub use embedding::EmbeddingVector;
pub use enums::{
    CheckpointType, ConversationPhase, EnumParseError, NodeRole, OutlierMethod, ResolutionTier,
    TaskType,
};
pub use error::{
    ConfigError, GraphError, LlmError, PersistenceError, StrataError, StrataResult, VectorError,
};
pub use identity::{
    community_id_for_task, compute_content_hash, new_id, CheckpointId, CommunityId, ContentHash,
    ConversationId, NodeId, TaskId, Timestamp,
};
pub use tokens::{estimate_tokens, title_line, truncate_chars, truncate_to_token_budget};
