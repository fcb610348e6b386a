//! Debounced background summarization
//!
//! Every new node schedules a pass after a quiet period. Scheduling again
//! aborts the pending pass, so at most one is outstanding per graph. A pass
//! only writes to the graph in its final synchronous step, so an aborted
//! pass leaves the graph untouched.

use crate::summarizer::{SummarizationReport, Summarizer};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use strata_graph::HistoryGraph;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Cancellable deferred summarization over a shared graph.
pub struct BackgroundSummarizer {
    graph: Arc<Mutex<HistoryGraph>>,
    summarizer: Arc<Mutex<Summarizer>>,
    delay: Duration,
    pending: StdMutex<Option<JoinHandle<()>>>,
}

impl BackgroundSummarizer {
    pub fn new(
        graph: Arc<Mutex<HistoryGraph>>,
        summarizer: Arc<Mutex<Summarizer>>,
        delay: Duration,
    ) -> Self {
        Self {
            graph,
            summarizer,
            delay,
            pending: StdMutex::new(None),
        }
    }

    pub fn graph(&self) -> &Arc<Mutex<HistoryGraph>> {
        &self.graph
    }

    pub fn summarizer(&self) -> &Arc<Mutex<Summarizer>> {
        &self.summarizer
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule a pass after the configured delay, replacing any pending one.
    ///
    /// Returns false when called outside a tokio runtime.
    pub fn schedule(&self) -> bool {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "No async runtime, summarization not scheduled");
                return false;
            }
        };

        let mut pending = self.pending();
        if let Some(handle) = pending.take() {
            if !handle.is_finished() {
                handle.abort();
                tracing::debug!("Cancelled pending summarization pass");
            }
        }

        let graph = Arc::clone(&self.graph);
        let summarizer = Arc::clone(&self.summarizer);
        let delay = self.delay;
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            run_pass(&graph, &summarizer).await;
        }));
        true
    }

    /// Abort the pending pass. Returns true if one was still waiting or
    /// running.
    pub fn cancel(&self) -> bool {
        match self.pending().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel any pending pass and run one immediately.
    pub async fn run_now(&self) -> SummarizationReport {
        self.cancel();
        run_pass(&self.graph, &self.summarizer).await
    }
}

impl Drop for BackgroundSummarizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for BackgroundSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSummarizer")
            .field("delay", &self.delay)
            .field("has_pending", &self.has_pending())
            .finish()
    }
}

/// The graph lock is released while the service runs.
async fn run_pass(
    graph: &Mutex<HistoryGraph>,
    summarizer: &Mutex<Summarizer>,
) -> SummarizationReport {
    let mut summarizer = summarizer.lock().await;
    let plan = {
        let graph = graph.lock().await;
        summarizer.prepare(&graph)
    };
    if plan.is_empty() && !plan.skipped_for_budget {
        return SummarizationReport::default();
    }

    let outcomes = summarizer.execute(&plan).await;
    let mut graph = graph.lock().await;
    summarizer.apply(&mut graph, &plan, outcomes)
}
