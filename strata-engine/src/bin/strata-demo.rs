//! Offline walkthrough of the engine
//!
//! Usage: cargo run --bin strata-demo [graph-output.json]
//!
//! Builds a short conversation, compresses distant turns with the mock
//! summarizer, gates chunks from an in-memory index and prints the compiled
//! context with its critique.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{CheckpointType, ConversationPhase, ResolutionTier, StrataResult, TaskType};
use strata_engine::{
    init_tracing, ContextEngine, ContextRequest, EngineConfig, TelemetryConfig,
};
use strata_graph::NewNode;
use strata_llm::{InMemoryRetrievalService, ServiceRegistry};

const DOCS: &[(&str, &str)] = &[
    ("auth-1", "fn rotate_token(session: &Session) -> Token { issue_token(session.user_id) }"),
    ("auth-2", "Session tokens expire after fifteen minutes and are rotated on every refresh."),
    ("db-1", "The sessions table stores user_id, token_hash and expires_at columns."),
    ("ui-1", "The settings page renders a dark theme toggle."),
    ("ops-1", "Deploys go through the staging cluster before production."),
    ("test-1", "#[test] fn rotates_expired_tokens() { assert!(rotate_token(&s).is_fresh()); }"),
];

const TURNS: &[(&str, &str)] = &[
    ("user", "We need to redesign how login sessions work."),
    ("assistant", "Sessions currently live in a single table keyed by user id."),
    ("user", "Tokens never expire right now, that is the main problem."),
    ("assistant", "Adding an expires_at column and a refresh endpoint would fix that."),
    ("user", "Agreed. Let's also rotate the token on every refresh."),
    ("assistant", "Rotation means issuing a new token and invalidating the old hash."),
    ("user", "Write the rotation function."),
    ("assistant", "Here is rotate_token, it calls issue_token with the session's user id."),
];

#[tokio::main]
async fn main() -> StrataResult<()> {
    let _ = init_tracing(&TelemetryConfig::from_env());
    let output: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);

    let retrieval = InMemoryRetrievalService::new();
    for (id, content) in DOCS {
        retrieval.index(*id, *content, HashMap::new())?;
    }
    let mut registry = ServiceRegistry::new();
    registry.register_retrieval(Arc::new(retrieval));

    let mut engine = ContextEngine::new(EngineConfig::from_env(), &registry)?;

    let mut ids = Vec::with_capacity(TURNS.len());
    for (i, (role, content)) in TURNS.iter().enumerate() {
        let node = match *role {
            "user" => NewNode::user(*content),
            _ => NewNode::assistant(*content),
        };
        let phase = if i < 4 {
            ConversationPhase::Planning
        } else {
            ConversationPhase::Implementation
        };
        let id = engine
            .add_interaction(node.with_phase(phase).with_tasks(["sessions"]))
            .await?;
        ids.push(id);
    }

    // Checkpointed turns never drop below SUMMARY.
    engine.graph().lock().await.create_checkpoint(
        &ids[3..5],
        CheckpointType::Decision,
        "Token expiry",
        "Add expires_at and rotate tokens on refresh",
        "Shapes every later session change",
    );

    let report = engine.flush_summarization().await;
    println!(
        "Summarized {}/{} eligible nodes (fallbacks: {}, rejected: {}, cost: {:.4})",
        report.summarized, report.eligible, report.fallbacks, report.rejected, report.actual_cost
    );

    let request = ContextRequest::new("How does session token rotation work?")
        .with_task_type(TaskType::Code)
        .with_retrieval_type("code")
        .with_k(6);
    let context = engine.retrieve_context(&request).await;

    if let Some(window) = &context.window {
        println!(
            "\nWindow: {} nodes, {} tokens (full {}, summary {}, title {}, hidden {})",
            window.nodes.len(),
            window.metrics.total_tokens,
            window.metrics.count(ResolutionTier::Full),
            window.metrics.count(ResolutionTier::Summary),
            window.metrics.count(ResolutionTier::Title),
            window.metrics.count(ResolutionTier::Hidden),
        );
    }
    println!(
        "Gate: kept {} of {} at threshold {:.3}",
        context.chunks.len(),
        context.gate.decisions.len(),
        context.gate.threshold
    );
    for decision in &context.gate.decisions {
        println!("  {:<8} {:.3} {:?}", decision.chunk_id, decision.score, decision.reason);
    }

    println!("\n--- context ---\n{}", context.render());

    let critique = &context.critique;
    println!("--- critique ---");
    println!("quality: {:.3}", critique.overall_quality);
    for blindspot in &critique.blindspots {
        println!("blindspot: {}", blindspot);
    }
    for suggestion in &critique.suggestions {
        println!("suggestion: {}", suggestion);
    }

    if let Some(path) = output {
        if engine.save_graph(&path).await {
            println!("\nGraph written to {}", path.display());
        }
    }
    Ok(())
}
