//! Structural metrics over a [`GraphSnapshot`].
//!
//! Everything here is synchronous and pure. Metrics are recomputed from
//! scratch for every snapshot; snapshots are capped upstream by the graph
//! query limit, so the all-pairs BFS used for the diameter stays cheap.
//!
//! The graph is treated as undirected and simple: self-loops, edges to
//! unknown nodes and parallel edges are discarded before anything is counted.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::types::GraphSnapshot;

/// Default size of the "top nodes" list.
pub const TOP_NODE_LIMIT: usize = 10;

const DEGREE_WEIGHT: f64 = 0.6;
const CENTRALITY_WEIGHT: f64 = 0.4;

/// Derived structural metrics of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    /// Distinct undirected edges that survived sanitising.
    pub edge_count: usize,
    pub degree_by_node: BTreeMap<String, usize>,
    /// Degree centrality, `degree / (n - 1)`.
    pub centrality_by_node: BTreeMap<String, f64>,
    pub clustering_by_node: BTreeMap<String, f64>,
    pub average_degree: f64,
    pub max_degree: usize,
    /// Mean local clustering coefficient over all nodes.
    pub clustering_coefficient: f64,
    /// Longest finite shortest path. Pairs in different components are
    /// ignored, so for a disconnected graph this is the largest component
    /// diameter rather than infinity.
    pub diameter: usize,
    /// Number of connected components. At least 1 for any non-empty graph;
    /// the empty graph has no components and reports 0.
    pub connected_components: usize,
}

impl GraphMetrics {
    /// Metrics of the empty graph.
    pub fn empty() -> Self {
        Self {
            node_count: 0,
            edge_count: 0,
            degree_by_node: BTreeMap::new(),
            centrality_by_node: BTreeMap::new(),
            clustering_by_node: BTreeMap::new(),
            average_degree: 0.0,
            max_degree: 0,
            clustering_coefficient: 0.0,
            diameter: 0,
            connected_components: 0,
        }
    }

    pub fn degree(&self, node_id: &str) -> usize {
        self.degree_by_node.get(node_id).copied().unwrap_or(0)
    }

    pub fn centrality(&self, node_id: &str) -> f64 {
        self.centrality_by_node.get(node_id).copied().unwrap_or(0.0)
    }

    /// True when every node can reach every other node.
    pub fn is_connected(&self) -> bool {
        self.connected_components <= 1
    }
}

/// Node ranked by importance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeImportance {
    pub node_id: String,
    pub label: String,
    pub node_type: String,
    pub degree: usize,
    pub centrality: f64,
    pub importance: f64,
}

/// Undirected simple adjacency over snapshot node indices.
struct Adjacency {
    ids: Vec<String>,
    neighbours: Vec<BTreeSet<usize>>,
}

impl Adjacency {
    fn build(snapshot: &GraphSnapshot) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut ids = Vec::new();
        for node in &snapshot.nodes {
            if !index.contains_key(node.id.as_str()) {
                index.insert(node.id.as_str(), ids.len());
                ids.push(node.id.clone());
            }
        }

        let mut neighbours = vec![BTreeSet::new(); ids.len()];
        for edge in snapshot.valid_edges() {
            let (Some(&a), Some(&b)) = (
                index.get(edge.source_id.as_str()),
                index.get(edge.target_id.as_str()),
            ) else {
                continue;
            };
            neighbours[a].insert(b);
            neighbours[b].insert(a);
        }

        Self { ids, neighbours }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn degree(&self, v: usize) -> usize {
        self.neighbours[v].len()
    }

    fn local_clustering(&self, v: usize) -> f64 {
        let neighbours: Vec<usize> = self.neighbours[v].iter().copied().collect();
        let k = neighbours.len();
        if k < 2 {
            return 0.0;
        }

        let mut closed = 0usize;
        for (i, &a) in neighbours.iter().enumerate() {
            for &b in &neighbours[i + 1..] {
                if self.neighbours[a].contains(&b) {
                    closed += 1;
                }
            }
        }
        closed as f64 / (k * (k - 1) / 2) as f64
    }

    /// Longest finite distance from `source`.
    fn eccentricity(&self, source: usize) -> usize {
        let mut dist: Vec<Option<usize>> = vec![None; self.len()];
        let mut queue = VecDeque::new();
        dist[source] = Some(0);
        queue.push_back(source);

        let mut farthest = 0;
        while let Some(v) = queue.pop_front() {
            let d = dist[v].unwrap_or(0);
            farthest = farthest.max(d);
            for &w in &self.neighbours[v] {
                if dist[w].is_none() {
                    dist[w] = Some(d + 1);
                    queue.push_back(w);
                }
            }
        }
        farthest
    }

    fn component_count(&self) -> usize {
        let mut visited = vec![false; self.len()];
        let mut components = 0;
        let mut stack = Vec::new();

        for start in 0..self.len() {
            if visited[start] {
                continue;
            }
            components += 1;
            visited[start] = true;
            stack.push(start);
            while let Some(v) = stack.pop() {
                for &w in &self.neighbours[v] {
                    if !visited[w] {
                        visited[w] = true;
                        stack.push(w);
                    }
                }
            }
        }
        components
    }
}

/// Compute all structural metrics of `snapshot`.
pub fn compute_metrics(snapshot: &GraphSnapshot) -> GraphMetrics {
    let adjacency = Adjacency::build(snapshot);
    let n = adjacency.len();
    if n == 0 {
        return GraphMetrics::empty();
    }

    let degrees: Vec<usize> = (0..n).map(|v| adjacency.degree(v)).collect();
    let degree_sum: usize = degrees.iter().sum();
    let max_degree = degrees.iter().copied().max().unwrap_or(0);

    let centrality = |degree: usize| {
        if n > 1 {
            degree as f64 / (n - 1) as f64
        } else {
            0.0
        }
    };

    let clustering: Vec<f64> = (0..n).map(|v| adjacency.local_clustering(v)).collect();
    let diameter = (0..n)
        .map(|v| adjacency.eccentricity(v))
        .max()
        .unwrap_or(0);

    GraphMetrics {
        node_count: n,
        edge_count: degree_sum / 2,
        degree_by_node: adjacency
            .ids
            .iter()
            .cloned()
            .zip(degrees.iter().copied())
            .collect(),
        centrality_by_node: adjacency
            .ids
            .iter()
            .cloned()
            .zip(degrees.iter().map(|&d| centrality(d)))
            .collect(),
        clustering_by_node: adjacency
            .ids
            .iter()
            .cloned()
            .zip(clustering.iter().copied())
            .collect(),
        average_degree: degree_sum as f64 / n as f64,
        max_degree,
        clustering_coefficient: clustering.iter().sum::<f64>() / n as f64,
        diameter,
        connected_components: adjacency.component_count(),
    }
}

/// Rank every node by `0.6 * degree / max_degree + 0.4 * centrality`.
///
/// The sort is stable, so ties keep snapshot order.
pub fn rank_nodes(snapshot: &GraphSnapshot, metrics: &GraphMetrics) -> Vec<NodeImportance> {
    let mut seen = std::collections::HashSet::new();
    let mut ranked: Vec<NodeImportance> = snapshot
        .nodes
        .iter()
        .filter(|node| seen.insert(node.id.as_str()))
        .map(|node| {
            let degree = metrics.degree(&node.id);
            let centrality = metrics.centrality(&node.id);
            let degree_share = if metrics.max_degree > 0 {
                degree as f64 / metrics.max_degree as f64
            } else {
                0.0
            };
            NodeImportance {
                node_id: node.id.clone(),
                label: node.label.clone(),
                node_type: node.node_type.clone(),
                degree,
                centrality,
                importance: DEGREE_WEIGHT * degree_share + CENTRALITY_WEIGHT * centrality,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// The `limit` most important nodes.
pub fn top_nodes(
    snapshot: &GraphSnapshot,
    metrics: &GraphMetrics,
    limit: usize,
) -> Vec<NodeImportance> {
    let mut ranked = rank_nodes(snapshot, metrics);
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
