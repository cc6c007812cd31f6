//! Reasoning and knowledge-graph backend collaborators.
//!
//! The orchestrator and the view layer only see the [`ReasoningService`] and
//! [`GraphService`] traits; [`BackendClient`] implements both over HTTP.

mod chunks;
mod client;
mod types;

pub use chunks::*;
pub use client::*;
pub use types::*;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::abort::AbortSignal;
use crate::error::BackendResult;

/// Receiving end of an incremental response. Items arrive in wire order; the
/// channel closes when the response body ends or the reader stops.
pub type ChunkReceiver = mpsc::Receiver<BackendResult<StreamChunk>>;

/// Buffer between the body reader and the orchestrator.
pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Query side of the reasoning backend.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Open the incremental channel for `request`.
    async fn open_stream(
        &self,
        request: &QueryRequest,
        signal: AbortSignal,
    ) -> BackendResult<ChunkReceiver>;

    /// Single request/response call with the same logical payload as
    /// `final_result`.
    async fn query(&self, request: &QueryRequest, signal: AbortSignal)
        -> BackendResult<QueryResponse>;
}

/// Graph query and node enrichment endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Fetch the neighbourhood graph of an entity.
    async fn query_graph(&self, request: &GraphQueryRequest) -> BackendResult<GraphData>;

    /// Fetch raw enrichment data for a node. `lookup_key` is either the node
    /// id or its label, depending on where the node came from.
    async fn node_details(&self, lookup_key: &str, node_type: &str) -> BackendResult<Value>;
}
