//! Retrieved context chunks and feedback about them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A chunk of externally retrieved knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub content: String,
    /// Similarity to the query as reported by the retrieval backend
    pub similarity: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Retrieval backends return chunks directly.
pub type RetrievalResult = ContextChunk;

impl ContextChunk {
    pub fn new(chunk_id: impl Into<String>, content: impl Into<String>, similarity: f32) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            content: content.into(),
            similarity,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Feedback about the chunks a gate let through.
///
/// `useful` runs parallel to `chunk_ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkFeedback {
    pub chunk_ids: Vec<String>,
    pub useful: Vec<bool>,
    #[serde(default)]
    pub missing_context: Option<String>,
    #[serde(default)]
    pub unnecessary_chunk_ids: Vec<String>,
}

impl ChunkFeedback {
    /// Fraction of chunks marked useful, or `None` when no flags were given.
    pub fn precision(&self) -> Option<f32> {
        if self.useful.is_empty() {
            return None;
        }
        let useful = self.useful.iter().filter(|u| **u).count();
        Some(useful as f32 / self.useful.len() as f32)
    }

    /// Whether a non-blank missing-context note is present.
    pub fn reports_missing_context(&self) -> bool {
        self.missing_context
            .as_deref()
            .is_some_and(|note| !note.trim().is_empty())
    }

    /// Share of included chunks reported as unnecessary.
    pub fn unnecessary_ratio(&self) -> f32 {
        if self.chunk_ids.is_empty() {
            return 0.0;
        }
        self.unnecessary_chunk_ids.len() as f32 / self.chunk_ids.len() as f32
    }
}
