//! Streaming query orchestration.
//!
//! [`QueryOrchestrator`] owns at most one in-flight query. Each submission
//! appends a user entry and a streaming assistant placeholder, opens the
//! incremental channel, routes step chunks into the [`StepAggregator`] and
//! finalises the placeholder on `final_result`. When the channel fails for
//! any reason other than an abort, a single plain request with the same
//! query is tried before the entry is marked failed.
//!
//! ```text
//! Idle ─submit─▶ Submitting ─open─▶ Streaming ─final_result─▶ Completed
//!                    │                  │
//!                    └──channel error───┴─▶ FallbackRequested ─▶ Completed | Failed
//!
//! any state ─cancel / new submit / clear─▶ Cancelled
//! ```
//!
//! Completed answers that name an entity trigger one background graph
//! enrichment per entry; its failure is logged and otherwise ignored.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::abort::{AbortController, AbortReason, AbortSignal};
use crate::backend::{
    ChunkReceiver, GraphQueryRequest, GraphService, QueryRequest, QueryResponse,
    ReasoningService, StreamChunk,
};
use crate::config::GraphQueryConfig;
use crate::error::{QueryError, QueryResult};
use crate::graph::GraphSnapshot;
use crate::steps::{StepAggregator, StepEvent};
use crate::transcript::{ConversationEntry, TranscriptStore};


/// Text shown in place of an answer that could not be produced.
pub const FAILURE_NOTICE: &str =
    "Sorry, something went wrong while answering your question. Please try again.";

/// Settled turns sent along with each query.
const HISTORY_TURNS: usize = 10;

/// Lifecycle of the current query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    Submitting,
    Streaming,
    FallbackRequested,
    Completed,
    Cancelled,
    Failed,
}

impl QueryState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Idle => "idle",
            QueryState::Submitting => "submitting",
            QueryState::Streaming => "streaming",
            QueryState::FallbackRequested => "fallback_requested",
            QueryState::Completed => "completed",
            QueryState::Cancelled => "cancelled",
            QueryState::Failed => "failed",
        }
    }

    /// True while a query is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueryState::Submitting | QueryState::Streaming | QueryState::FallbackRequested
        )
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a query ended.
#[derive(Debug)]
pub struct QueryReport {
    pub entry_id: String,
    /// `Completed` or `Cancelled`; failures come back as `Err`.
    pub state: QueryState,
    /// Background graph enrichment; resolves to true when the graph was
    /// replaced.
    pub enrichment: Option<JoinHandle<bool>>,
}

/// Handle to a submitted query.
#[derive(Debug)]
pub struct QueryHandle {
    entry_id: String,
    task: JoinHandle<QueryResult<QueryReport>>,
}

impl QueryHandle {
    /// Id of the assistant entry this query fills in.
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Wait for the query to finish.
    pub async fn wait(self) -> QueryResult<QueryReport> {
        self.task.await.map_err(|e| QueryError::TaskFailed {
            message: e.to_string(),
        })?
    }
}

struct ActiveQuery {
    controller: AbortController,
    entry_id: String,
    generation: u64,
}

enum StreamEnd {
    Final(QueryResponse),
    Cancelled(AbortReason),
    Failed(String),
}

enum Outcome {
    Completed(QueryResponse),
    Cancelled(AbortReason),
    Failed(String),
}

/// Top-level query controller.
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    reasoning: Arc<dyn ReasoningService>,
    graph: Arc<dyn GraphService>,
    transcript: TranscriptStore,
    graph_query: GraphQueryConfig,
    session_id: String,
    active: Mutex<Option<ActiveQuery>>,
    enrichment_requested: Mutex<HashSet<String>>,
    state: watch::Sender<QueryState>,
    /// Bumped on every submission and abort; stale tasks may not publish state.
    generation: AtomicU64,
}

impl QueryOrchestrator {
    /// Create an orchestrator over the given collaborators and transcript.
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        graph: Arc<dyn GraphService>,
        transcript: TranscriptStore,
        graph_query: GraphQueryConfig,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::Idle);
        Self {
            inner: Arc::new(Inner {
                reasoning,
                graph,
                transcript,
                graph_query,
                session_id: Uuid::new_v4().to_string(),
                active: Mutex::new(None),
                enrichment_requested: Mutex::new(HashSet::new()),
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The transcript this orchestrator writes to.
    pub fn transcript(&self) -> &TranscriptStore {
        &self.inner.transcript
    }

    /// Conversation session id sent with every query.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Current state of the latest query.
    pub fn state(&self) -> QueryState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<QueryState> {
        self.inner.state.subscribe()
    }

    /// Submit a query.
    ///
    /// Blank input is ignored. An in-flight query is cancelled, and its entry
    /// marked, before the new user and assistant entries are appended. Both
    /// entries exist by the time this returns; the network work runs in a
    /// background task.
    pub async fn submit(&self, query_text: &str) -> Option<QueryHandle> {
        let query = query_text.trim();
        if query.is_empty() {
            debug!("Ignoring blank query");
            return None;
        }

        let mut active = self.inner.active.lock().await;
        if let Some(previous) = active.take() {
            self.inner
                .abort_active(previous, AbortReason::Superseded)
                .await;
        }

        let transcript = &self.inner.transcript;
        let history = transcript.history(HISTORY_TURNS).await;
        transcript.push(ConversationEntry::user(query)).await;
        let entry_id = transcript
            .push(ConversationEntry::assistant_placeholder())
            .await;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let controller = AbortController::new();
        let signal = controller.signal();
        *active = Some(ActiveQuery {
            controller,
            entry_id: entry_id.clone(),
            generation,
        });
        self.inner.state.send_replace(QueryState::Submitting);
        drop(active);

        info!(
            entry_id = %entry_id,
            query_len = query.len(),
            history = history.len(),
            "Query submitted"
        );

        let request = QueryRequest::new(query)
            .with_session_id(&self.inner.session_id)
            .with_history(history);
        let task = tokio::spawn(Arc::clone(&self.inner).run_query(
            entry_id.clone(),
            request,
            signal,
            generation,
        ));

        Some(QueryHandle { entry_id, task })
    }

    /// Cancel the in-flight query. Returns false when nothing was running.
    pub async fn cancel(&self) -> bool {
        let previous = self.inner.active.lock().await.take();
        match previous {
            Some(previous) => {
                self.inner
                    .abort_active(previous, AbortReason::UserCancelled)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Cancel anything in flight and drop the whole transcript.
    pub async fn clear(&self) {
        let previous = self.inner.active.lock().await.take();
        if let Some(previous) = previous {
            self.inner.abort_active(previous, AbortReason::Cleared).await;
        }
        self.inner.enrichment_requested.lock().await.clear();
        self.inner.transcript.clear().await;
        self.inner.state.send_replace(QueryState::Idle);
    }

    /// Start graph enrichment for a finished entry unless one was already
    /// requested for it. Safe to call on every render.
    pub async fn request_enrichment(&self, entry_id: &str) -> Option<JoinHandle<bool>> {
        self.inner.request_enrichment(entry_id).await
    }
}

impl Inner {
    fn set_state(&self, generation: u64, state: QueryState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_replace(state);
        }
    }

    async fn abort_active(&self, active: ActiveQuery, reason: AbortReason) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        active.controller.abort(reason);

        let marked = self
            .transcript
            .update_streaming(&active.entry_id, |entry| {
                entry.streaming = false;
                entry.cancelled = true;
            })
            .await;

        if marked.is_some() {
            self.state.send_replace(QueryState::Cancelled);
            info!(entry_id = %active.entry_id, reason = %reason, "Query cancelled");
        }
    }

    async fn release(&self, generation: u64) {
        let mut active = self.active.lock().await;
        if matches!(active.as_ref(), Some(a) if a.generation == generation) {
            *active = None;
        }
    }

    async fn run_query(
        self: Arc<Self>,
        entry_id: String,
        request: QueryRequest,
        mut signal: AbortSignal,
        generation: u64,
    ) -> QueryResult<QueryReport> {
        let outcome = self
            .execute(&entry_id, &request, &mut signal, generation)
            .await;

        let report = match outcome {
            Outcome::Completed(response) if !signal.is_aborted() => {
                self.finish_completed(&entry_id, response, generation).await
            }
            Outcome::Completed(_) => {
                let reason = signal.reason().unwrap_or(AbortReason::UserCancelled);
                Ok(self.finish_cancelled(&entry_id, reason).await)
            }
            Outcome::Cancelled(reason) => Ok(self.finish_cancelled(&entry_id, reason).await),
            Outcome::Failed(message) => self.finish_failed(&entry_id, message, generation).await,
        };

        self.release(generation).await;
        report
    }

    async fn execute(
        &self,
        entry_id: &str,
        request: &QueryRequest,
        signal: &mut AbortSignal,
        generation: u64,
    ) -> Outcome {
        let failure = match self.reasoning.open_stream(request, signal.clone()).await {
            Ok(mut chunks) => {
                self.set_state(generation, QueryState::Streaming);
                debug!(entry_id = %entry_id, "Query stream open");
                match self.consume_stream(entry_id, &mut chunks, signal).await {
                    StreamEnd::Final(response) => return Outcome::Completed(response),
                    StreamEnd::Cancelled(reason) => return Outcome::Cancelled(reason),
                    StreamEnd::Failed(message) => message,
                }
            }
            Err(e) => e.to_string(),
        };

        if let Some(reason) = signal.reason() {
            return Outcome::Cancelled(reason);
        }

        warn!(
            entry_id = %entry_id,
            error = %failure,
            "Query stream failed, falling back to plain request"
        );
        self.set_state(generation, QueryState::FallbackRequested);

        match self.reasoning.query(request, signal.clone()).await {
            Ok(response) => Outcome::Completed(response),
            Err(e) => match signal.reason() {
                Some(reason) => Outcome::Cancelled(reason),
                None => Outcome::Failed(e.to_string()),
            },
        }
    }

    async fn consume_stream(
        &self,
        entry_id: &str,
        chunks: &mut ChunkReceiver,
        signal: &mut AbortSignal,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                reason = signal.aborted() => return StreamEnd::Cancelled(reason),
                next = chunks.recv() => next,
            };

            match next {
                Some(Ok(StreamChunk::Step(payload))) => {
                    self.apply_step(entry_id, payload.into()).await
                }
                Some(Ok(StreamChunk::StepComplete(payload))) => {
                    self.apply_step(entry_id, payload.into()).await
                }
                Some(Ok(StreamChunk::FinalResult(response))) => return StreamEnd::Final(response),
                Some(Ok(StreamChunk::Error(payload))) => {
                    let message = if payload.error.is_empty() {
                        "backend reported an error".to_string()
                    } else {
                        payload.error
                    };
                    return StreamEnd::Failed(message);
                }
                Some(Err(e)) => return StreamEnd::Failed(e.to_string()),
                None => {
                    return StreamEnd::Failed("stream closed before final result".to_string())
                }
            }
        }
    }

    async fn apply_step(&self, entry_id: &str, event: StepEvent) {
        let applied = self
            .transcript
            .update_streaming(entry_id, |entry| {
                StepAggregator::on_step_event(&mut entry.steps, event)
            })
            .await;
        if applied.is_none() {
            debug!(entry_id = %entry_id, "Dropping step for finalised entry");
        }
    }

    async fn finish_completed(
        self: &Arc<Self>,
        entry_id: &str,
        response: QueryResponse,
        generation: u64,
    ) -> QueryResult<QueryReport> {
        let entities = response.entity_names();
        let reasoning_path = response.reasoning_path_labels();
        let graph = response.graph_data.map(GraphSnapshot::from);
        let text = response.integrated_response;
        let step_count = self
            .transcript
            .update_streaming(entry_id, move |entry| {
                entry.text = text;
                entry.graph = graph;
                entry.entities = entities;
                entry.reasoning_path = reasoning_path;
                entry.streaming = false;
                entry.steps.len()
            })
            .await;

        let Some(step_count) = step_count else {
            return Ok(QueryReport {
                entry_id: entry_id.to_string(),
                state: QueryState::Cancelled,
                enrichment: None,
            });
        };

        self.set_state(generation, QueryState::Completed);
        info!(entry_id = %entry_id, steps = step_count, "Query completed");

        Ok(QueryReport {
            entry_id: entry_id.to_string(),
            state: QueryState::Completed,
            enrichment: self.request_enrichment(entry_id).await,
        })
    }

    async fn finish_cancelled(&self, entry_id: &str, reason: AbortReason) -> QueryReport {
        self.transcript
            .update_streaming(entry_id, |entry| {
                entry.streaming = false;
                entry.cancelled = true;
            })
            .await;
        debug!(entry_id = %entry_id, reason = %reason, "Query task stopped");

        QueryReport {
            entry_id: entry_id.to_string(),
            state: QueryState::Cancelled,
            enrichment: None,
        }
    }

    async fn finish_failed(
        &self,
        entry_id: &str,
        message: String,
        generation: u64,
    ) -> QueryResult<QueryReport> {
        let detail = message.clone();
        let marked = self
            .transcript
            .update_streaming(entry_id, move |entry| {
                entry.text = FAILURE_NOTICE.to_string();
                entry.error = Some(detail);
                entry.streaming = false;
            })
            .await;

        if marked.is_none() {
            return Ok(QueryReport {
                entry_id: entry_id.to_string(),
                state: QueryState::Cancelled,
                enrichment: None,
            });
        }

        self.set_state(generation, QueryState::Failed);
        error!(entry_id = %entry_id, error = %message, "Query failed after fallback");
        self.transcript.notify_failure(entry_id, message.clone());

        Err(QueryError::FallbackFailed { message })
    }

    async fn request_enrichment(self: &Arc<Self>, entry_id: &str) -> Option<JoinHandle<bool>> {
        let entry = self.transcript.get(entry_id).await?;
        if entry.streaming || entry.cancelled {
            return None;
        }
        let entity = entry.entities.first()?.clone();

        if !self
            .enrichment_requested
            .lock()
            .await
            .insert(entry_id.to_string())
        {
            debug!(entry_id = %entry_id, "Enrichment already requested");
            return None;
        }

        let inner = Arc::clone(self);
        let entry_id = entry_id.to_string();
        Some(tokio::spawn(async move { inner.enrich(entry_id, entity).await }))
    }

    async fn enrich(&self, entry_id: String, entity: String) -> bool {
        let request = GraphQueryRequest::new(&entity, &self.graph_query);

        let data = match self.graph.query_graph(&request).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    entry_id = %entry_id,
                    entity = %entity,
                    error = %e,
                    "Graph enrichment failed, keeping original graph"
                );
                return false;
            }
        };

        let snapshot = GraphSnapshot::from(data);
        if snapshot.is_empty() {
            debug!(entry_id = %entry_id, entity = %entity, "Enrichment returned no nodes");
            return false;
        }

        let nodes = snapshot.nodes.len();
        match self.transcript.replace_graph(&entry_id, snapshot).await {
            Ok(()) => {
                info!(entry_id = %entry_id, entity = %entity, nodes, "Graph enriched");
                true
            }
            Err(e) => {
                debug!(entry_id = %entry_id, error = %e, "Enriched entry no longer exists");
                false
            }
        }
    }
}
