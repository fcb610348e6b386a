//! Error types for Strata operations

use crate::NodeId;
use thiserror::Error;

/// History graph errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    #[error("Parent node not found: {id}")]
    ParentNotFound { id: NodeId },

    #[error("Community not found: {id}")]
    CommunityNotFound { id: uuid::Uuid },
}

/// External service errors (summarization, retrieval, judge).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No {service} service configured")]
    ServiceNotConfigured { service: String },

    #[error("Request to {service} failed: {message}")]
    RequestFailed { service: String, message: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Summarization failed: {reason}")]
    SummarizationFailed { reason: String },

    #[error("Retrieval failed: {reason}")]
    RetrievalFailed { reason: String },

    #[error("Judge failed: {reason}")]
    JudgeFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Persistence errors for graph snapshots and gating profiles.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("IO error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

/// Vector operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },
}

/// Master error type for all Strata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

impl PersistenceError {
    /// Build an IO error for a path.
    pub fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
