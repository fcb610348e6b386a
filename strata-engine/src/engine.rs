//! Context engine facade
//!
//! Owns one conversation graph and wires the full data flow: new
//! interactions schedule background summarization; a context request runs
//! retrieval, gates the results, compiles the history window, critiques the
//! chunks and feeds the critique back into the gate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strata_context::{CompileOptions, ContextCompiler, ContextWindow};
use strata_core::{
    ChunkFeedback, CommunityId, ConfigError, ContextChunk, GateConfig, NodeId, ResolutionConfig,
    ResolutionTier, StrataResult, TaskType,
};
use strata_critic::{ContextCritique, CritiqueHistory, QualityCritic};
use strata_gate::{AdaptiveGate, ChunkLimits, GateReport, ProfileStore};
use strata_graph::{GraphStats, HistoryGraph, NewNode};
use strata_llm::{
    MockSummarizationService, RetrievalService, SearchFilters, ServiceRegistry,
};
use strata_summarizer::{BackgroundSummarizer, SummarizationReport, Summarizer, SummarizerStats};
use tokio::sync::Mutex;

/// Retrieval type used when a request does not name one.
pub const DEFAULT_RETRIEVAL_TYPE: &str = "default";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub resolution: ResolutionConfig,
    pub gate: GateConfig,
    /// Gating profile key
    pub project_id: String,
    /// Directory holding one profile file per project; `None` keeps
    /// profiles in memory
    pub profile_dir: Option<PathBuf>,
    /// Feed each critique back into the gate automatically
    pub auto_feedback: bool,
    /// Critique scores kept for trend reporting
    pub critique_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let resolution = ResolutionConfig::balanced();
        Self {
            gate: GateConfig::from_resolution(&resolution),
            resolution,
            project_id: "default".to_string(),
            profile_dir: None,
            auto_feedback: true,
            critique_history: 100,
        }
    }
}

impl EngineConfig {
    /// Build from a resolution config, deriving the gate bounds from it.
    pub fn with_resolution(resolution: ResolutionConfig) -> Self {
        Self {
            gate: GateConfig::from_resolution(&resolution),
            resolution,
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(dir.into());
        self
    }

    /// Resolution settings from [`ResolutionConfig::from_env`], plus
    /// `STRATA_PROJECT_ID` and `STRATA_PROFILE_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::with_resolution(ResolutionConfig::from_env());
        if let Ok(project) = std::env::var("STRATA_PROJECT_ID") {
            if !project.trim().is_empty() {
                config.project_id = project;
            }
        }
        if let Ok(dir) = std::env::var("STRATA_PROFILE_DIR") {
            if !dir.trim().is_empty() {
                config.profile_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }

    pub fn validate(&self) -> StrataResult<()> {
        self.resolution.validate()?;
        self.gate.validate()?;
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "project_id".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// One retrieval-augmented context request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRequest {
    pub query: String,
    pub retrieval_type: String,
    pub task_type: TaskType,
    /// Candidates requested from the retrieval service
    pub k: usize,
    /// Gate limits; the gate configuration's defaults when `None`
    pub limits: Option<ChunkLimits>,
    pub filters: Option<SearchFilters>,
    /// History token budget; `target_context_size` when `None`
    pub max_tokens: Option<i32>,
    /// A response already produced from this context, checked for blindspots
    pub response: Option<String>,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            retrieval_type: DEFAULT_RETRIEVAL_TYPE.to_string(),
            task_type: TaskType::General,
            k: 10,
            limits: None,
            filters: None,
            max_tokens: None,
            response: None,
        }
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_retrieval_type(mut self, retrieval_type: impl Into<String>) -> Self {
        self.retrieval_type = retrieval_type.into();
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_limits(mut self, limits: ChunkLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// Everything produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    /// `None` while the graph is empty
    pub window: Option<ContextWindow>,
    /// Rendered history window
    pub history: String,
    /// Chunks the gate kept, best first
    pub chunks: Vec<ContextChunk>,
    pub gate: GateReport,
    pub critique: ContextCritique,
    /// Feedback sent to the gate, if any
    pub feedback: Option<ChunkFeedback>,
    pub elapsed: Duration,
}

impl RetrievedContext {
    /// Prompt text: the history window followed by the retrieved chunks.
    pub fn render(&self) -> String {
        let mut out = self.history.clone();
        if !self.chunks.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str("## Retrieved context\n");
            for chunk in &self.chunks {
                out.push_str(&format!("\n[{}]\n{}\n", chunk.chunk_id, chunk.content));
            }
        }
        out
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Conversation-scoped context engine.
///
/// The graph is shared with the background summarizer; every other piece of
/// state belongs to the engine and is mutated through `&mut self`.
pub struct ContextEngine {
    config: EngineConfig,
    graph: Arc<Mutex<HistoryGraph>>,
    summarizer: Arc<Mutex<Summarizer>>,
    background: BackgroundSummarizer,
    compiler: ContextCompiler,
    gate: AdaptiveGate,
    critic: QualityCritic,
    retrieval: Option<Arc<dyn RetrievalService>>,
    critiques: CritiqueHistory,
}

impl ContextEngine {
    /// Build an engine from the services in `registry`.
    ///
    /// Without a summarization service the offline mock is used. Without a
    /// retrieval service requests compile history only. The judge is
    /// optional.
    pub fn new(config: EngineConfig, registry: &ServiceRegistry) -> StrataResult<Self> {
        config.validate()?;

        let service = match registry.summarization() {
            Ok(service) => service,
            Err(_) => {
                tracing::info!("No summarization service registered, using offline mock");
                Arc::new(MockSummarizationService::new())
            }
        };
        let retrieval = registry.retrieval().ok();
        let critic = match registry.judge() {
            Some(judge) => QualityCritic::with_judge(judge),
            None => QualityCritic::new(),
        };
        let store = match &config.profile_dir {
            Some(dir) => ProfileStore::at(dir),
            None => ProfileStore::in_memory(),
        };

        let graph = Arc::new(Mutex::new(HistoryGraph::new()));
        let summarizer = Arc::new(Mutex::new(Summarizer::new(config.resolution.clone(), service)));
        let background = BackgroundSummarizer::new(
            Arc::clone(&graph),
            Arc::clone(&summarizer),
            Duration::from_millis(config.resolution.summarization_delay_ms),
        );

        tracing::info!(
            project_id = %config.project_id,
            has_retrieval = retrieval.is_some(),
            has_judge = critic.has_judge(),
            persistent_profiles = config.profile_dir.is_some(),
            "Context engine ready"
        );

        Ok(Self {
            compiler: ContextCompiler::new(config.resolution.clone()),
            gate: AdaptiveGate::new(config.gate.clone(), store),
            critiques: CritiqueHistory::new(config.critique_history),
            config,
            graph,
            summarizer,
            background,
            critic,
            retrieval,
        })
    }

    /// Offline engine: mock summarizer, no retrieval, no judge.
    pub fn offline(config: EngineConfig) -> StrataResult<Self> {
        Self::new(config, &ServiceRegistry::new())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared graph handle. Holding the lock blocks background passes.
    pub fn graph(&self) -> &Arc<Mutex<HistoryGraph>> {
        &self.graph
    }

    pub fn compiler(&self) -> &ContextCompiler {
        &self.compiler
    }

    pub fn gate(&self) -> &AdaptiveGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut AdaptiveGate {
        &mut self.gate
    }

    pub fn critique_history(&self) -> &CritiqueHistory {
        &self.critiques
    }

    pub fn has_pending_summarization(&self) -> bool {
        self.background.has_pending()
    }

    pub async fn graph_stats(&self) -> GraphStats {
        self.graph.lock().await.stats()
    }

    pub async fn summarizer_stats(&self) -> SummarizerStats {
        self.summarizer.lock().await.stats().clone()
    }

    /// Append a node and schedule a debounced summarization pass.
    pub async fn add_interaction(&self, node: NewNode) -> StrataResult<NodeId> {
        let node_id = self.graph.lock().await.add_node(node)?;
        self.background.schedule();
        Ok(node_id)
    }

    /// Compile the history window at the current node.
    pub async fn compile(&self, options: &CompileOptions) -> Option<ContextWindow> {
        let graph = self.graph.lock().await;
        let current = graph.current_node_id()?;
        Some(self.compiler.compile(&graph, &current, options))
    }

    /// Run one request through retrieval, gating, compilation and critique.
    ///
    /// Never fails: a missing or failing retrieval service yields no chunks,
    /// an empty graph yields no window.
    pub async fn retrieve_context(&mut self, request: &ContextRequest) -> RetrievedContext {
        let started = Instant::now();

        let candidates = self.search(request).await;
        let limits = request
            .limits
            .unwrap_or_else(|| ChunkLimits::from_config(self.gate.config()));
        let report = self.gate.filter_results_with_report(
            candidates,
            &self.config.project_id,
            &request.retrieval_type,
            limits,
        );

        let options = CompileOptions {
            max_tokens: request.max_tokens,
            ..CompileOptions::default()
        };
        let (window, history) = {
            let mut graph = self.graph.lock().await;
            match graph.current_node_id() {
                Some(current) => {
                    let window = self.compiler.compile(&graph, &current, &options);
                    for id in window.nodes_at(ResolutionTier::Full) {
                        graph.record_access(&id);
                    }
                    let history = window.render(&graph);
                    (Some(window), history)
                }
                None => (None, String::new()),
            }
        };

        let critique = self
            .critic
            .critique(
                &request.query,
                &report.included,
                request.response.as_deref(),
                request.task_type,
            )
            .await;
        self.critiques.record(&critique);

        let feedback = if self.config.auto_feedback && !report.included.is_empty() {
            let feedback = QualityCritic::to_feedback(&critique, &report.included);
            self.gate
                .record_feedback(&self.config.project_id, &request.retrieval_type, &feedback);
            Some(feedback)
        } else {
            None
        };

        let elapsed = started.elapsed();
        tracing::info!(
            retrieval_type = %request.retrieval_type,
            task_type = %request.task_type.as_str(),
            candidates = report.decisions.len(),
            included = report.included.len(),
            threshold = report.threshold,
            window_nodes = window.as_ref().map_or(0, |w| w.nodes.len()),
            window_tokens = window.as_ref().map_or(0, |w| w.metrics.total_tokens),
            quality = critique.overall_quality,
            elapsed_ms = elapsed.as_millis() as u64,
            "Context retrieved"
        );

        RetrievedContext {
            window,
            history,
            chunks: report.included.clone(),
            gate: report,
            critique,
            feedback,
            elapsed,
        }
    }

    async fn search(&self, request: &ContextRequest) -> Vec<ContextChunk> {
        let Some(retrieval) = &self.retrieval else {
            tracing::debug!("No retrieval service, skipping search");
            return Vec::new();
        };
        match retrieval
            .search(&request.query, request.k, request.filters.as_ref())
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retrieval_type = %request.retrieval_type,
                    "Retrieval failed, continuing without chunks"
                );
                Vec::new()
            }
        }
    }

    /// Feed externally collected feedback into the gate.
    pub fn record_feedback(&mut self, retrieval_type: &str, feedback: &ChunkFeedback) {
        self.gate
            .record_feedback(&self.config.project_id, retrieval_type, feedback);
    }

    /// Run summarization now, cancelling any pending background pass.
    pub async fn flush_summarization(&self) -> SummarizationReport {
        self.background.run_now().await
    }

    /// Summarize one community. The graph stays locked while the service
    /// runs.
    pub async fn summarize_community(&self, community_id: &CommunityId) -> bool {
        let mut summarizer = self.summarizer.lock().await;
        let mut graph = self.graph.lock().await;
        summarizer.summarize_community(&mut graph, community_id).await
    }

    /// Write the graph snapshot. Failures are logged and reported as false.
    pub async fn save_graph(&self, path: &Path) -> bool {
        let graph = self.graph.lock().await;
        match graph.save_json(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), nodes = graph.len(), "Saved graph");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to save graph");
                false
            }
        }
    }

    /// Replace the graph with a snapshot.
    ///
    /// A pending summarization pass is cancelled first. On failure the
    /// current graph is kept and false is returned.
    pub async fn load_graph(&self, path: &Path) -> bool {
        self.background.cancel();
        match HistoryGraph::load_json(path) {
            Ok(loaded) => {
                let nodes = loaded.len();
                *self.graph.lock().await = loaded;
                tracing::info!(path = %path.display(), nodes, "Loaded graph");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load graph");
                false
            }
        }
    }
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("project_id", &self.config.project_id)
            .field("has_retrieval", &self.retrieval.is_some())
            .field("critic", &self.critic.has_judge())
            .field("background", &self.background)
            .finish()
    }
}
