//! On-demand node enrichment.
//!
//! A [`NodeDetailResolver`] is one detail-panel session: results are cached
//! per `(node_id, node_type)` until [`dismiss`](NodeDetailResolver::dismiss)
//! is called, and concurrent requests for the same key share one fetch.
//! Failures never propagate; they come back as an error-flagged
//! [`NodeDetail`] so the panel can render a "no details" state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::backend::GraphService;
use crate::graph::GraphNode;

/// Enrichment record for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub basic_info: Map<String, Value>,
    #[serde(default)]
    pub algorithms: Vec<Value>,
    #[serde(default)]
    pub data_structures: Vec<Value>,
    #[serde(default)]
    pub techniques: Vec<Value>,
    #[serde(default)]
    pub complexity: Map<String, Value>,
    #[serde(default)]
    pub related_problems: Vec<Value>,
    #[serde(default)]
    pub solutions: Vec<Value>,
    #[serde(default)]
    pub insights: Vec<Value>,
    #[serde(default)]
    pub advantages: Vec<Value>,
    #[serde(default)]
    pub disadvantages: Vec<Value>,
    /// Set when the fetch failed; the other fields are then empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeDetail {
    /// Error-flagged detail for a failed lookup.
    pub fn failed(node: &GraphNode, message: impl Into<String>) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when any enrichment section carries data.
    pub fn has_content(&self) -> bool {
        !(self.basic_info.is_empty()
            && self.algorithms.is_empty()
            && self.data_structures.is_empty()
            && self.techniques.is_empty()
            && self.complexity.is_empty()
            && self.related_problems.is_empty()
            && self.solutions.is_empty()
            && self.insights.is_empty()
            && self.advantages.is_empty()
            && self.disadvantages.is_empty())
    }

    /// Normalise a raw backend payload. Accepts the record itself or a
    /// `{"data": {...}}` envelope, and tolerates `null` sections.
    pub fn from_response(node: &GraphNode, raw: Value) -> Result<Self, String> {
        let mut body = match raw {
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Object(inner)) => inner,
                Some(other) => {
                    obj.insert("data".to_string(), other);
                    obj
                }
                None => obj,
            },
            other => return Err(format!("Expected a JSON object, got {}", kind_of(&other))),
        };

        body.retain(|_, value| !value.is_null());
        let mut detail: NodeDetail = serde_json::from_value(Value::Object(body))
            .map_err(|e| format!("Malformed node details: {}", e))?;

        detail.node_id = node.id.clone();
        detail.node_type = node.node_type.clone();
        detail.error = None;
        if detail.basic_info.is_empty() {
            detail
                .basic_info
                .insert("name".to_string(), Value::String(node.label.clone()));
            detail
                .basic_info
                .insert("type".to_string(), Value::String(node.node_type.clone()));
        }
        Ok(detail)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

type DetailKey = (String, String);

/// Cached, de-duplicating node detail lookups for one panel session
pub struct NodeDetailResolver {
    service: Arc<dyn GraphService>,
    synthetic_prefix: String,
    cache: Mutex<HashMap<DetailKey, Arc<OnceCell<NodeDetail>>>>,
}

impl NodeDetailResolver {
    /// Create a resolver. Nodes whose id starts with `synthetic_prefix` are
    /// looked up by label.
    pub fn new(service: Arc<dyn GraphService>, synthetic_prefix: impl Into<String>) -> Self {
        Self {
            service,
            synthetic_prefix: synthetic_prefix.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Key sent to the backend for `node`.
    ///
    /// The lightweight graph query invents local ids that the enrichment
    /// backend has never seen; it indexes those nodes by label instead.
    pub fn lookup_key<'a>(&self, node: &'a GraphNode) -> &'a str {
        let synthetic =
            !self.synthetic_prefix.is_empty() && node.id.starts_with(&self.synthetic_prefix);
        if synthetic && !node.label.trim().is_empty() {
            node.label.as_str()
        } else {
            node.id.as_str()
        }
    }

    /// Details for `node`, fetched at most once per session.
    pub async fn resolve(&self, node: &GraphNode) -> NodeDetail {
        let key = (node.id.clone(), node.node_type.clone());
        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| self.fetch(node)).await.clone()
    }

    async fn fetch(&self, node: &GraphNode) -> NodeDetail {
        let lookup_key = self.lookup_key(node);
        debug!(
            node_id = %node.id,
            lookup_key = %lookup_key,
            node_type = %node.node_type,
            "Resolving node details"
        );

        let raw = match self.service.node_details(lookup_key, &node.node_type).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(node_id = %node.id, error = %e, "Node detail fetch failed");
                return NodeDetail::failed(node, e.to_string());
            }
        };

        NodeDetail::from_response(node, raw).unwrap_or_else(|message| {
            warn!(node_id = %node.id, error = %message, "Node detail payload rejected");
            NodeDetail::failed(node, message)
        })
    }

    /// Discard every cached result; the next open starts a fresh session.
    pub async fn dismiss(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached keys (including in-flight ones).
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGraphService;
    use crate::error::BackendError;
    use serde_json::json;

    fn resolver(mock: MockGraphService) -> NodeDetailResolver {
        NodeDetailResolver::new(Arc::new(mock), "local_")
    }

    #[tokio::test]
    async fn test_synthetic_node_uses_label() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .withf(|key, node_type| key == "Binary Search" && node_type == "Algorithm")
            .times(1)
            .returning(|_, _| Ok(json!({"basic_info": {"name": "Binary Search"}})));

        let node = GraphNode::new("local_3", "Binary Search", "Algorithm");
        let detail = resolver(mock).resolve(&node).await;

        assert!(!detail.is_error());
        assert_eq!(detail.node_id, "local_3");
        assert_eq!(detail.basic_info["name"], "Binary Search");
    }

    #[tokio::test]
    async fn test_enriched_node_uses_id() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .withf(|key, _| key == "algo:42")
            .times(1)
            .returning(|_, _| Ok(json!({"algorithms": [{"name": "BFS"}]})));

        let node = GraphNode::new("algo:42", "Breadth First Search", "Algorithm");
        let detail = resolver(mock).resolve(&node).await;

        assert_eq!(detail.algorithms.len(), 1);
        assert_eq!(detail.basic_info["name"], "Breadth First Search");
    }

    #[tokio::test]
    async fn test_repeat_resolve_hits_cache() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .times(1)
            .returning(|_, _| Ok(json!({"insights": ["halves the search space"]})));

        let resolver = resolver(mock);
        let node = GraphNode::new("n1", "Binary Search", "Algorithm");
        let (first, second) = tokio::join!(resolver.resolve(&node), resolver.resolve(&node));

        assert_eq!(first, second);
        assert_eq!(resolver.resolve(&node).await, first);
        assert_eq!(resolver.cached().await, 1);
    }

    #[tokio::test]
    async fn test_same_id_different_type_is_separate_key() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .times(2)
            .returning(|_, _| Ok(json!({})));

        let resolver = resolver(mock);
        resolver.resolve(&GraphNode::new("n1", "Heap", "DataStructure")).await;
        resolver.resolve(&GraphNode::new("n1", "Heap", "Concept")).await;
        assert_eq!(resolver.cached().await, 2);
    }

    #[tokio::test]
    async fn test_failure_returns_error_flagged_detail() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details().times(1).returning(|_, _| {
            Err(BackendError::Api {
                status: 404,
                message: "not found".to_string(),
            })
        });

        let node = GraphNode::new("n404", "Unknown", "Concept");
        let detail = resolver(mock).resolve(&node).await;

        assert!(detail.is_error());
        assert!(!detail.has_content());
        assert_eq!(detail.node_id, "n404");
        assert!(detail.error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_dismiss_forces_refetch() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .times(2)
            .returning(|_, _| Ok(json!({})));

        let resolver = resolver(mock);
        let node = GraphNode::new("n1", "Heap", "DataStructure");
        resolver.resolve(&node).await;
        resolver.dismiss().await;
        assert_eq!(resolver.cached().await, 0);
        resolver.resolve(&node).await;
    }

    #[test]
    fn test_from_response_unwraps_data_envelope_and_nulls() {
        let node = GraphNode::new("n1", "Quick Sort", "Algorithm");
        let detail = NodeDetail::from_response(
            &node,
            json!({
                "success": true,
                "data": {
                    "complexity": {"time": "O(n log n)"},
                    "advantages": ["in-place"],
                    "disadvantages": null
                }
            }),
        )
        .unwrap();

        assert_eq!(detail.complexity["time"], "O(n log n)");
        assert_eq!(detail.advantages, vec![json!("in-place")]);
        assert!(detail.disadvantages.is_empty());
        assert!(detail.has_content());
    }

    #[test]
    fn test_from_response_rejects_non_object() {
        let node = GraphNode::new("n1", "Quick Sort", "Algorithm");
        let err = NodeDetail::from_response(&node, json!(["nope"])).unwrap_err();
        assert_eq!(err, "Expected a JSON object, got an array");
    }

    #[test]
    fn test_empty_prefix_never_substitutes() {
        let resolver = NodeDetailResolver::new(Arc::new(MockGraphService::new()), "");
        let node = GraphNode::new("local_1", "Label", "Concept");
        assert_eq!(resolver.lookup_key(&node), "local_1");
    }
}
