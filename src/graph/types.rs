use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use crate::backend::GraphData;
use crate::error::{AppError, AppResult};

/// Knowledge-graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub node_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// Create a node without properties
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: node_type.into(),
            properties: Map::new(),
        }
    }
}

/// Directed relationship between two nodes; metrics treat it as undirected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub relationship: String,
}

impl GraphEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship: relationship.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

/// Complete graph returned by one query. Replaced wholesale, never merged.
///
/// Node ids are unique; [`GraphSnapshot::new`] keeps the first node for a
/// repeated id. Edges may reference ids that are not present; those and
/// self-loops are filtered out by [`GraphSnapshot::valid_edges`], which the
/// metrics engine builds its adjacency from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_node_id: Option<String>,
}

impl GraphSnapshot {
    /// Build a snapshot, collapsing duplicate node ids (first wins).
    pub fn new(
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        center_node_id: Option<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let nodes = nodes
            .into_iter()
            .filter(|node| seen.insert(node.id.clone()))
            .collect();

        Self {
            nodes,
            edges,
            center_node_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Center node, if the backend named one that is present.
    pub fn center_node(&self) -> Option<&GraphNode> {
        self.center_node_id.as_deref().and_then(|id| self.node(id))
    }

    /// Edges whose endpoints both exist and differ.
    pub fn valid_edges(&self) -> Vec<&GraphEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|edge| {
                !edge.is_self_loop()
                    && ids.contains(edge.source_id.as_str())
                    && ids.contains(edge.target_id.as_str())
            })
            .collect()
    }

    /// Load a snapshot from a JSON file in backend `graph_data` shape.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::GraphData {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse a snapshot from backend `graph_data` JSON.
    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let data: GraphData = serde_json::from_str(raw).map_err(|e| AppError::GraphData {
            message: format!("Invalid graph JSON: {}", e),
        })?;
        Ok(data.into())
    }
}

impl From<GraphData> for GraphSnapshot {
    fn from(data: GraphData) -> Self {
        let center_node_id = data.center_node_id();
        let nodes = data
            .nodes
            .into_iter()
            .map(|node| GraphNode {
                label: node
                    .label
                    .filter(|label| !label.trim().is_empty())
                    .unwrap_or_else(|| node.id.clone()),
                id: node.id,
                node_type: node.node_type,
                properties: node.properties,
            })
            .collect();
        let edges = data
            .edges
            .into_iter()
            .map(|edge| GraphEdge {
                source_id: edge.source,
                target_id: edge.target,
                relationship: edge.relationship,
            })
            .collect();

        GraphSnapshot::new(nodes, edges, center_node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_ids_keep_first() {
        let snapshot = GraphSnapshot::new(
            vec![
                GraphNode::new("a", "First", "Algorithm"),
                GraphNode::new("a", "Second", "Algorithm"),
                GraphNode::new("b", "B", "Concept"),
            ],
            vec![],
            None,
        );

        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.node("a").unwrap().label, "First");
    }

    #[test]
    fn test_valid_edges_drop_dangling_and_self_loops() {
        let snapshot = GraphSnapshot::new(
            vec![GraphNode::new("a", "A", "t"), GraphNode::new("b", "B", "t")],
            vec![
                GraphEdge::new("a", "b", "USES"),
                GraphEdge::new("a", "missing", "USES"),
                GraphEdge::new("b", "b", "SELF"),
            ],
            None,
        );

        let valid = snapshot.valid_edges();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].target_id, "b");
    }

    #[test]
    fn test_from_graph_data_fills_missing_labels() {
        let data: GraphData = serde_json::from_value(json!({
            "nodes": [
                {"id": "n1", "type": "Algorithm"},
                {"id": "n2", "label": "Array", "type": "DataStructure"}
            ],
            "edges": [{"source": "n1", "target": "n2", "relationship": "OPERATES_ON"}],
            "center_node": "n1"
        }))
        .unwrap();

        let snapshot = GraphSnapshot::from(data);
        assert_eq!(snapshot.node("n1").unwrap().label, "n1");
        assert_eq!(snapshot.node("n2").unwrap().label, "Array");
        assert_eq!(snapshot.edges[0].relationship, "OPERATES_ON");
        assert_eq!(snapshot.center_node().map(|n| n.id.as_str()), Some("n1"));
    }

    #[test]
    fn test_from_json_str_rejects_garbage() {
        let err = GraphSnapshot::from_json_str("{nodes:").unwrap_err();
        assert!(err.to_string().starts_with("Graph data error: Invalid graph JSON"));
    }
}
