//! View-layer owner of the currently displayed graph.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::metrics::{compute_metrics, top_nodes, GraphMetrics, NodeImportance, TOP_NODE_LIMIT};
use super::types::{GraphNode, GraphSnapshot};
use crate::backend::{GraphQueryRequest, GraphService};
use crate::config::GraphQueryConfig;
use crate::detail::{NodeDetail, NodeDetailResolver};
use crate::error::BackendResult;

/// Current snapshot plus everything derived from it.
///
/// Metrics and the top-node list are recomputed whenever the snapshot is
/// replaced. The node detail session belongs to the snapshot and is
/// discarded with it.
pub struct GraphView {
    service: Arc<dyn GraphService>,
    query: GraphQueryConfig,
    snapshot: Option<GraphSnapshot>,
    metrics: GraphMetrics,
    top: Vec<NodeImportance>,
    details: NodeDetailResolver,
    selected: Option<String>,
}

impl GraphView {
    pub fn new(service: Arc<dyn GraphService>, query: GraphQueryConfig) -> Self {
        let details = NodeDetailResolver::new(Arc::clone(&service), query.synthetic_prefix.clone());
        Self {
            service,
            query,
            snapshot: None,
            metrics: GraphMetrics::empty(),
            top: Vec::new(),
            details,
            selected: None,
        }
    }

    /// Display `snapshot`, replacing whatever was shown before.
    pub async fn show(&mut self, snapshot: GraphSnapshot) {
        self.metrics = compute_metrics(&snapshot);
        self.top = top_nodes(&snapshot, &self.metrics, TOP_NODE_LIMIT);
        debug!(
            nodes = self.metrics.node_count,
            edges = self.metrics.edge_count,
            components = self.metrics.connected_components,
            "Graph snapshot replaced"
        );
        self.snapshot = Some(snapshot);
        self.dismiss_details().await;
    }

    /// Query the graph backend for `entity` and display the result.
    ///
    /// On failure the current graph stays on screen.
    pub async fn search(&mut self, entity: &str) -> BackendResult<()> {
        let entity = entity.trim();
        let request = GraphQueryRequest::new(entity, &self.query);
        match self.service.query_graph(&request).await {
            Ok(data) => {
                let snapshot = GraphSnapshot::from(data);
                info!(entity = %entity, nodes = snapshot.nodes.len(), "Graph search completed");
                self.show(snapshot).await;
                Ok(())
            }
            Err(e) => {
                warn!(entity = %entity, error = %e, "Graph search failed");
                Err(e)
            }
        }
    }

    /// Open the detail panel for a node of the current snapshot.
    pub async fn open_node(&mut self, node_id: &str) -> Option<NodeDetail> {
        let node = self.snapshot.as_ref()?.node(node_id)?.clone();
        self.selected = Some(node.id.clone());
        Some(self.details.resolve(&node).await)
    }

    /// Close the detail panel and forget its cached lookups.
    pub async fn dismiss_details(&mut self) {
        self.selected = None;
        self.details.dismiss().await;
    }

    pub fn snapshot(&self) -> Option<&GraphSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn metrics(&self) -> &GraphMetrics {
        &self.metrics
    }

    pub fn top_nodes(&self) -> &[NodeImportance] {
        &self.top
    }

    /// Id of the node whose detail panel is open.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Node count per node type.
    pub fn type_distribution(&self) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for node in self.nodes() {
            *distribution.entry(node.node_type.clone()).or_insert(0) += 1;
        }
        distribution
    }

    /// Nodes of one type, in snapshot order. Matching ignores case.
    pub fn nodes_of_type(&self, node_type: &str) -> Vec<&GraphNode> {
        self.nodes()
            .filter(|node| node.node_type.eq_ignore_ascii_case(node_type))
            .collect()
    }

    fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.snapshot.iter().flat_map(|snapshot| snapshot.nodes.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GraphData, MockGraphService, WireEdge, WireNode};
    use crate::error::BackendError;
    use crate::graph::GraphEdge;
    use serde_json::{json, Map};

    fn config() -> GraphQueryConfig {
        GraphQueryConfig::default()
    }

    fn wire_node(id: &str, label: &str, node_type: &str) -> WireNode {
        WireNode {
            id: id.to_string(),
            label: Some(label.to_string()),
            node_type: node_type.to_string(),
            properties: Map::new(),
        }
    }

    fn sorting_snapshot() -> GraphSnapshot {
        GraphSnapshot::new(
            vec![
                GraphNode::new("qs", "Quick Sort", "Algorithm"),
                GraphNode::new("ms", "Merge Sort", "Algorithm"),
                GraphNode::new("arr", "Array", "DataStructure"),
            ],
            vec![
                GraphEdge::new("qs", "arr", "OPERATES_ON"),
                GraphEdge::new("ms", "arr", "OPERATES_ON"),
            ],
            Some("arr".to_string()),
        )
    }

    #[tokio::test]
    async fn test_show_recomputes_metrics() {
        let mut view = GraphView::new(Arc::new(MockGraphService::new()), config());
        assert_eq!(view.metrics().node_count, 0);

        view.show(sorting_snapshot()).await;

        assert_eq!(view.metrics().node_count, 3);
        assert_eq!(view.metrics().edge_count, 2);
        assert_eq!(view.top_nodes()[0].node_id, "arr");
    }

    #[tokio::test]
    async fn test_search_replaces_snapshot() {
        let mut mock = MockGraphService::new();
        mock.expect_query_graph()
            .withf(|req| req.entity_name == "heap" && req.depth == 2 && req.limit == 50)
            .times(1)
            .returning(|_| {
                Ok(GraphData {
                    nodes: vec![
                        wire_node("h", "Heap", "DataStructure"),
                        wire_node("hs", "Heap Sort", "Algorithm"),
                    ],
                    edges: vec![WireEdge {
                        source: "hs".to_string(),
                        target: "h".to_string(),
                        relationship: "USES".to_string(),
                    }],
                    center_node: Some(json!("h")),
                })
            });

        let mut view = GraphView::new(Arc::new(mock), config());
        view.show(sorting_snapshot()).await;
        view.search("  heap ").await.unwrap();

        let snapshot = view.snapshot().unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.center_node_id.as_deref(), Some("h"));
        assert_eq!(view.metrics().edge_count, 1);
    }

    #[tokio::test]
    async fn test_search_failure_keeps_current_graph() {
        let mut mock = MockGraphService::new();
        mock.expect_query_graph().times(1).returning(|_| {
            Err(BackendError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        });

        let mut view = GraphView::new(Arc::new(mock), config());
        view.show(sorting_snapshot()).await;

        assert!(view.search("heap").await.is_err());
        assert_eq!(view.snapshot(), Some(&sorting_snapshot()));
        assert_eq!(view.metrics().node_count, 3);
    }

    #[tokio::test]
    async fn test_open_node_and_dismiss() {
        let mut mock = MockGraphService::new();
        mock.expect_node_details()
            .withf(|key, node_type| key == "qs" && node_type == "Algorithm")
            .times(2)
            .returning(|_, _| Ok(json!({"complexity": {"time": "O(n log n)"}})));

        let mut view = GraphView::new(Arc::new(mock), config());
        view.show(sorting_snapshot()).await;

        let detail = view.open_node("qs").await.unwrap();
        assert_eq!(detail.complexity["time"], "O(n log n)");
        assert_eq!(view.selected(), Some("qs"));

        // Cached within the session.
        view.open_node("qs").await.unwrap();

        view.dismiss_details().await;
        assert_eq!(view.selected(), None);
        view.open_node("qs").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_unknown_node() {
        let mut view = GraphView::new(Arc::new(MockGraphService::new()), config());
        assert!(view.open_node("qs").await.is_none());

        view.show(sorting_snapshot()).await;
        assert!(view.open_node("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_type_distribution_and_filter() {
        let mut view = GraphView::new(Arc::new(MockGraphService::new()), config());
        assert!(view.type_distribution().is_empty());

        view.show(sorting_snapshot()).await;

        let distribution = view.type_distribution();
        assert_eq!(distribution["Algorithm"], 2);
        assert_eq!(distribution["DataStructure"], 1);

        let algorithms: Vec<&str> = view
            .nodes_of_type("algorithm")
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(algorithms, vec!["qs", "ms"]);
    }
}
