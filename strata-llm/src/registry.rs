//! Service registry

use crate::service::{Judge, RetrievalService, SummarizationService};
use std::sync::Arc;
use strata_core::{LlmError, StrataError, StrataResult};

/// Registry for external services.
/// Services must be explicitly registered - no auto-discovery.
///
/// # Example
/// ```ignore
/// let mut registry = ServiceRegistry::new();
/// registry.register_summarization(Arc::new(MockSummarizationService::new()));
/// let summarizer = registry.summarization()?;
/// ```
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    summarization: Option<Arc<dyn SummarizationService>>,
    retrieval: Option<Arc<dyn RetrievalService>>,
    judge: Option<Arc<dyn Judge>>,
}

fn not_configured(service: &str) -> StrataError {
    StrataError::Llm(LlmError::ServiceNotConfigured {
        service: service.to_string(),
    })
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previously registered summarization service.
    pub fn register_summarization(&mut self, service: Arc<dyn SummarizationService>) {
        self.summarization = Some(service);
    }

    pub fn register_retrieval(&mut self, service: Arc<dyn RetrievalService>) {
        self.retrieval = Some(service);
    }

    pub fn register_judge(&mut self, judge: Arc<dyn Judge>) {
        self.judge = Some(judge);
    }

    pub fn summarization(&self) -> StrataResult<Arc<dyn SummarizationService>> {
        self.summarization
            .clone()
            .ok_or_else(|| not_configured("summarization"))
    }

    pub fn retrieval(&self) -> StrataResult<Arc<dyn RetrievalService>> {
        self.retrieval.clone().ok_or_else(|| not_configured("retrieval"))
    }

    /// The judge is optional; callers degrade without it.
    pub fn judge(&self) -> Option<Arc<dyn Judge>> {
        self.judge.clone()
    }

    pub fn has_summarization(&self) -> bool {
        self.summarization.is_some()
    }

    pub fn has_retrieval(&self) -> bool {
        self.retrieval.is_some()
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    pub fn clear_judge(&mut self) {
        self.judge = None;
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("summarization", &self.summarization.is_some())
            .field("retrieval", &self.retrieval.is_some())
            .field("judge", &self.judge.is_some())
            .finish()
    }
}
