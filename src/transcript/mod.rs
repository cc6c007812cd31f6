//! Conversation transcript state.
//!
//! [`TranscriptStore`] is the only mutable state shared between the query
//! orchestrator and the step aggregator. It is an explicit, cloneable handle
//! (no globals); views subscribe to [`TranscriptEvent`]s and re-read the
//! entries they care about.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::backend::{Message, MessageRole};
use crate::error::{QueryError, QueryResult};
use crate::graph::GraphSnapshot;
use crate::steps::ReasoningStep;

const EVENT_CAPACITY: usize = 256;

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationEntry {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// True while the assistant answer is still arriving.
    pub streaming: bool,
    pub cancelled: bool,
    pub steps: Vec<ReasoningStep>,
    pub graph: Option<GraphSnapshot>,
    pub entities: Vec<String>,
    pub reasoning_path: Vec<String>,
    /// Failure detail for an answer that could not be produced.
    pub error: Option<String>,
}

impl ConversationEntry {
    fn new(role: MessageRole, text: String, streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text,
            created_at: Utc::now(),
            streaming,
            cancelled: false,
            steps: Vec::new(),
            graph: None,
            entities: Vec::new(),
            reasoning_path: Vec::new(),
            error: None,
        }
    }

    /// A submitted question
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text.into(), false)
    }

    /// Empty assistant answer waiting for the stream
    pub fn assistant_placeholder() -> Self {
        Self::new(MessageRole::Assistant, String::new(), true)
    }

    /// Finished, not cancelled, and not a failure notice.
    pub fn is_settled(&self) -> bool {
        !self.streaming && !self.cancelled && self.error.is_none()
    }
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    EntryAdded { entry_id: String },
    EntryUpdated { entry_id: String },
    GraphReplaced { entry_id: String },
    /// Raised once per query whose fallback also failed.
    QueryFailed { entry_id: String, message: String },
    Cleared,
}

/// Shared, observable transcript
#[derive(Clone)]
pub struct TranscriptStore {
    entries: Arc<RwLock<Vec<ConversationEntry>>>,
    events: broadcast::Sender<TranscriptEvent>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Receive every change made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: TranscriptEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Append an entry and return its id
    pub async fn push(&self, entry: ConversationEntry) -> String {
        let entry_id = entry.id.clone();
        self.entries.write().await.push(entry);
        self.notify(TranscriptEvent::EntryAdded {
            entry_id: entry_id.clone(),
        });
        entry_id
    }

    /// Copy of one entry
    pub async fn get(&self, entry_id: &str) -> Option<ConversationEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
    }

    /// Copy of the whole transcript
    pub async fn entries(&self) -> Vec<ConversationEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Mutate an entry regardless of its state.
    pub async fn update<R>(
        &self,
        entry_id: &str,
        f: impl FnOnce(&mut ConversationEntry) -> R,
    ) -> QueryResult<R> {
        let result = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.id == entry_id)
                .ok_or_else(|| QueryError::EntryNotFound {
                    entry_id: entry_id.to_string(),
                })?;
            f(entry)
        };
        self.notify(TranscriptEvent::EntryUpdated {
            entry_id: entry_id.to_string(),
        });
        Ok(result)
    }

    /// Mutate an entry only while it is still streaming. Returns `None` when
    /// the entry is gone or already finalised.
    pub async fn update_streaming<R>(
        &self,
        entry_id: &str,
        f: impl FnOnce(&mut ConversationEntry) -> R,
    ) -> Option<R> {
        let result = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.id == entry_id && e.streaming)?;
            f(entry)
        };
        self.notify(TranscriptEvent::EntryUpdated {
            entry_id: entry_id.to_string(),
        });
        Some(result)
    }

    /// Replace an entry's graph wholesale.
    pub async fn replace_graph(&self, entry_id: &str, graph: GraphSnapshot) -> QueryResult<()> {
        {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.id == entry_id)
                .ok_or_else(|| QueryError::EntryNotFound {
                    entry_id: entry_id.to_string(),
                })?;
            entry.graph = Some(graph);
        }
        self.notify(TranscriptEvent::GraphReplaced {
            entry_id: entry_id.to_string(),
        });
        Ok(())
    }

    /// Raise the failure signal for an entry.
    pub fn notify_failure(&self, entry_id: &str, message: impl Into<String>) {
        self.notify(TranscriptEvent::QueryFailed {
            entry_id: entry_id.to_string(),
            message: message.into(),
        });
    }

    /// Last `limit` settled turns, oldest first, as backend history.
    pub async fn history(&self, limit: usize) -> Vec<Message> {
        let entries = self.entries.read().await;
        let mut settled: Vec<Message> = entries
            .iter()
            .rev()
            .filter(|e| e.is_settled() && !e.text.is_empty())
            .take(limit)
            .map(|e| Message {
                role: e.role,
                content: e.text.clone(),
            })
            .collect();
        settled.reverse();
        settled
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.notify(TranscriptEvent::Cleared);
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}
