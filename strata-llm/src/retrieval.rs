//! In-memory retrieval backend
//!
//! Indexes chunks with a deterministic bag-of-words hash embedding and
//! answers searches by cosine similarity. Intended for offline use and tests.

use crate::cost::CostTracker;
use crate::service::{RetrievalService, SearchFilters};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use strata_core::{
    compute_content_hash, ContextChunk, EmbeddingVector, LlmError, RetrievalResult, StrataError,
    StrataResult,
};

/// Deterministic text embedder: each lowercased word is hashed into one of
/// `dimensions` buckets, then the vector is normalized to unit length.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dimensions: i32,
}

impl HashEmbedder {
    pub fn new(dimensions: i32) -> Self {
        Self {
            model_id: "hash-bow".to_string(),
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> i32 {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> EmbeddingVector {
        let dims = self.dimensions as usize;
        let mut data = vec![0.0f32; dims];

        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let hash = compute_content_hash(word.to_lowercase().as_bytes());
            let bucket = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize % dims;
            data[bucket] += 1.0;
        }

        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }
        EmbeddingVector::new(data, self.model_id.clone())
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Retrieval service over chunks held in memory.
pub struct InMemoryRetrievalService {
    embedder: HashEmbedder,
    chunks: RwLock<Vec<(ContextChunk, EmbeddingVector)>>,
    tracker: Option<Arc<CostTracker>>,
}

impl InMemoryRetrievalService {
    pub fn new() -> Self {
        Self::with_embedder(HashEmbedder::default())
    }

    pub fn with_embedder(embedder: HashEmbedder) -> Self {
        Self {
            embedder,
            chunks: RwLock::new(Vec::new()),
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Add or replace a chunk.
    pub fn index(
        &self,
        chunk_id: impl Into<String>,
        content: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> StrataResult<()> {
        let mut chunk = ContextChunk::new(chunk_id, content, 0.0);
        chunk.metadata = metadata;
        let embedding = self.embedder.embed(&chunk.content);

        let mut chunks = self.chunks.write().map_err(|_| lock_poisoned())?;
        chunks.retain(|(c, _)| c.chunk_id != chunk.chunk_id);
        chunks.push((chunk, embedding));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRetrievalService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRetrievalService")
            .field("embedder", &self.embedder)
            .field("chunks", &self.len())
            .finish()
    }
}

fn lock_poisoned() -> StrataError {
    StrataError::Llm(LlmError::RetrievalFailed {
        reason: "index lock poisoned".to_string(),
    })
}

fn matches_filters(chunk: &ContextChunk, filters: Option<&SearchFilters>) -> bool {
    filters.map_or(true, |filters| {
        filters
            .iter()
            .all(|(key, value)| chunk.metadata.get(key) == Some(value))
    })
}

#[async_trait]
impl RetrievalService for InMemoryRetrievalService {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> StrataResult<Vec<RetrievalResult>> {
        if let Some(tracker) = &self.tracker {
            tracker.record_retrieval();
        }
        let query_vec = self.embedder.embed(query);
        let chunks = self.chunks.read().map_err(|_| lock_poisoned())?;

        let mut scored = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter() {
            if !matches_filters(chunk, filters) {
                continue;
            }
            let similarity = query_vec.cosine_similarity(embedding)?.clamp(0.0, 1.0);
            let mut result = chunk.clone();
            result.similarity = similarity;
            scored.push(result);
        }

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        tracing::debug!(query_len = query.len(), returned = scored.len(), "In-memory search");
        Ok(scored)
    }

    async fn embed(&self, text: &str) -> StrataResult<Option<EmbeddingVector>> {
        Ok(Some(self.embedder.embed(text)))
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Embeddings are unit length, or all zeros for text without words.
        #[test]
        fn prop_embedding_normalized(text in "[a-zA-Z0-9 _.,]{0,120}", dims in 1i32..512) {
            let embedding = HashEmbedder::new(dims).embed(&text);
            prop_assert_eq!(embedding.data.len(), dims as usize);
            let norm: f32 = embedding.data.iter().map(|x| x * x).sum::<f32>().sqrt();
            prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
        }

        /// Search returns at most `k` results, in descending similarity,
        /// each within [0, 1].
        #[test]
        fn prop_search_bounded_and_sorted(
            docs in prop::collection::vec("[a-z ]{1,60}", 0..20),
            query in "[a-z ]{0,30}",
            k in 0usize..10,
        ) {
            let service = InMemoryRetrievalService::new();
            for (i, doc) in docs.iter().enumerate() {
                service.index(format!("d{}", i), doc.clone(), HashMap::new()).unwrap();
            }
            let results = block_on(service.search(&query, k, None)).unwrap();

            prop_assert!(results.len() <= k.min(docs.len()));
            prop_assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
            prop_assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        }
    }
}
