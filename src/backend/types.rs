use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::GraphQueryConfig;
use crate::steps::StepStatus;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Prior turn sent along with a query for conversation continuity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request body for both the incremental and the plain query endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
}

impl QueryRequest {
    /// Create a request for a single query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            history: Vec::new(),
        }
    }

    /// Set the session ID for conversation continuity
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach prior turns
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Timestamp as sent by the backend: epoch seconds, epoch millis, or RFC 3339.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    Epoch(f64),
    Text(String),
}

impl WireTime {
    /// Values above 1e12 are taken as milliseconds.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTime::Epoch(value) if value.is_finite() && *value >= 0.0 => {
                let millis = if *value > 1e12 {
                    *value
                } else {
                    *value * 1000.0
                };
                Utc.timestamp_millis_opt(millis as i64).single()
            }
            WireTime::Epoch(_) => None,
            WireTime::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// `step` chunk: an agent has started
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepPayload {
    pub agent_name: String,
    pub step_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub start_time: Option<WireTime>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// `step_complete` chunk: an agent has finished
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepCompletePayload {
    pub agent_name: String,
    pub step_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    pub status: StepStatus,
    #[serde(default)]
    pub start_time: Option<WireTime>,
    #[serde(default)]
    pub end_time: Option<WireTime>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// `error` chunk
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, alias = "message", deserialize_with = "null_as_default")]
    pub error: String,
}

/// One unit of the incremental response, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Step(StepPayload),
    StepComplete(StepCompletePayload),
    FinalResult(QueryResponse),
    Error(ErrorPayload),
}

impl StreamChunk {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            StreamChunk::Step(_) => "step",
            StreamChunk::StepComplete(_) => "step_complete",
            StreamChunk::FinalResult(_) => "final_result",
            StreamChunk::Error(_) => "error",
        }
    }
}

/// Entity named by the reasoning pipeline; either a bare name or an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Name(String),
    Detailed {
        #[serde(alias = "entity_name", alias = "label")]
        name: String,
        #[serde(default, rename = "type")]
        entity_type: Option<String>,
    },
}

impl EntityRef {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Name(name) => name,
            EntityRef::Detailed { name, .. } => name,
        }
    }
}

/// Full response payload, shared by `final_result` and the plain query endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryResponse {
    #[serde(
        default,
        alias = "response",
        alias = "answer",
        deserialize_with = "null_as_default"
    )]
    pub integrated_response: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning_path: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub graph_data: Option<GraphData>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendations: Vec<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryResponse {
    /// Non-empty entity names in payload order
    pub fn entity_names(&self) -> Vec<String> {
        self.entities
            .iter()
            .map(|e| e.name().trim())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }

    /// Human-readable reasoning path labels
    pub fn reasoning_path_labels(&self) -> Vec<String> {
        self.reasoning_path
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => ["description", "agent_name", "step", "name"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_str))
                    .map(String::from),
                _ => None,
            })
            .collect()
    }
}

/// Node as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    pub id: String,
    #[serde(default, alias = "name")]
    pub label: Option<String>,
    #[serde(
        default,
        rename = "type",
        alias = "node_type",
        deserialize_with = "null_as_default"
    )]
    pub node_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Map<String, Value>,
}

/// Edge as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEdge {
    #[serde(alias = "source_id", alias = "from")]
    pub source: String,
    #[serde(alias = "target_id", alias = "to")]
    pub target: String,
    #[serde(
        default,
        alias = "type",
        alias = "relation",
        deserialize_with = "null_as_default"
    )]
    pub relationship: String,
}

/// Node/edge payload of `final_result.graph_data` and of the graph query endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<WireNode>,
    #[serde(
        default,
        alias = "relationships",
        alias = "links",
        deserialize_with = "null_as_default"
    )]
    pub edges: Vec<WireEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_node: Option<Value>,
}

impl GraphData {
    /// Center node id; the backend sends either an id or a node object.
    pub fn center_node_id(&self) -> Option<String> {
        match self.center_node.as_ref()? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(String::from),
            _ => None,
        }
    }
}

/// Request body of the graph query endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQueryRequest {
    pub entity_name: String,
    pub depth: u32,
    pub limit: u32,
    pub data_sources: Vec<String>,
}

impl GraphQueryRequest {
    /// Build a request for `entity_name` using configured depth, limit and sources
    pub fn new(entity_name: impl Into<String>, config: &GraphQueryConfig) -> Self {
        Self {
            entity_name: entity_name.into(),
            depth: config.depth,
            limit: config.limit,
            data_sources: config.data_sources.clone(),
        }
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
