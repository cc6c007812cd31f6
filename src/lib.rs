//! # Algo Graph Assistant
//!
//! Client-side core of an algorithm-learning assistant: streams answers from
//! a multi-agent reasoning backend, shows each reasoning step as it happens,
//! and analyses the knowledge graph that comes back with the answer.
//!
//! ## Features
//!
//! - **Streaming queries**: incremental step and answer chunks with a single
//!   plain-request fallback when the stream fails
//! - **Cancellation**: a new question supersedes the one in flight
//! - **Graph enrichment**: the lightweight answer graph is replaced by a
//!   richer neighbourhood of the first named entity
//! - **Graph metrics**: degree, centrality, clustering, diameter, components
//!   and node importance ranking
//! - **Node details**: cached, de-duplicated enrichment lookups per node
//!
//! ## Architecture
//!
//! ```text
//! CLI → QueryOrchestrator → BackendClient (HTTP, NDJSON stream)
//!            ↓
//!     TranscriptStore ← StepAggregator
//!            ↓
//!   GraphView → GraphMetrics / NodeDetailResolver
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use algo_graph_assistant::{BackendClient, Config, QueryOrchestrator, TranscriptStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let client = Arc::new(BackendClient::new(&config.backend, config.request.clone())?);
//!     let orchestrator = QueryOrchestrator::new(
//!         client.clone(),
//!         client,
//!         TranscriptStore::new(),
//!         config.graph.clone(),
//!     );
//!     if let Some(handle) = orchestrator.submit("Explain binary search").await {
//!         let report = handle.wait().await?;
//!         println!("{:?}", orchestrator.transcript().get(&report.entry_id).await);
//!     }
//!     Ok(())
//! }
//! ```

/// Cooperative cancellation signals.
pub mod abort;
/// Reasoning and graph backend collaborators and their HTTP client.
pub mod backend;
/// Command-line front end.
pub mod cli;
/// Configuration management.
pub mod config;
/// Node detail enrichment.
pub mod detail;
/// Error types and result aliases for the application.
pub mod error;
/// Graph snapshots, metrics and the graph view.
pub mod graph;
/// Streaming query orchestration.
pub mod orchestrator;
/// Reasoning step model and aggregation.
pub mod steps;
/// Observable conversation transcript.
pub mod transcript;

pub use abort::{AbortController, AbortReason, AbortSignal};
pub use backend::{BackendClient, GraphService, ReasoningService};
pub use config::Config;
pub use error::{AppError, AppResult, BackendError, QueryError};
pub use graph::{compute_metrics, GraphMetrics, GraphSnapshot, GraphView};
pub use orchestrator::{QueryHandle, QueryOrchestrator, QueryReport, QueryState};
pub use transcript::{ConversationEntry, TranscriptEvent, TranscriptStore};
