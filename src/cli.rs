//! Terminal front end.
//!
//! Each subcommand builds its output as text and hands back a [`CliResult`];
//! live progress while a query streams goes to stderr.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::{BackendClient, GraphService, ReasoningService};
use crate::config::Config;
use crate::detail::{NodeDetail, NodeDetailResolver};
use crate::graph::{
    compute_metrics, top_nodes, GraphMetrics, GraphNode, GraphSnapshot, NodeImportance,
};
use crate::orchestrator::{QueryHandle, QueryOrchestrator, QueryState};
use crate::steps::{ReasoningStep, StepAggregator, StepStatus};
use crate::transcript::{ConversationEntry, TranscriptEvent, TranscriptStore};

const RULE: &str = "────────────────────────────────────────────────────────────\n";

/// Algorithm knowledge-graph assistant.
#[derive(Parser, Debug)]
#[command(name = "algo-assistant", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ask one question and print the streamed answer
    Ask {
        /// Question text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Interactive session; a new line replaces an unanswered question
    Chat,

    /// Compute structural metrics of a graph JSON file
    Metrics {
        /// File in `graph_data` shape: {"nodes": [...], "edges": [...]}
        path: PathBuf,

        /// Number of top nodes to list
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Fetch enrichment details for one node
    Node {
        /// Node id
        id: String,

        /// Node type sent with the lookup
        #[arg(long, default_value = "Concept")]
        node_type: String,

        /// Label used for lookups of locally generated node ids
        #[arg(long)]
        label: Option<String>,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command against `client`.
pub async fn execute_command(
    command: Command,
    config: &Config,
    client: BackendClient,
) -> CliResult {
    let client = Arc::new(client);
    match command {
        Command::Ask { query } => {
            let orchestrator = build_orchestrator(config, &client);
            execute_ask(&orchestrator, &query.join(" ")).await
        }
        Command::Chat => {
            let orchestrator = build_orchestrator(config, &client);
            execute_chat(&orchestrator).await
        }
        Command::Metrics { path, top } => execute_metrics(path, top),
        Command::Node {
            id,
            node_type,
            label,
        } => execute_node(client, config, id, node_type, label).await,
    }
}

fn build_orchestrator(config: &Config, client: &Arc<BackendClient>) -> QueryOrchestrator {
    let reasoning: Arc<dyn ReasoningService> = client.clone();
    let graph: Arc<dyn GraphService> = client.clone();
    QueryOrchestrator::new(reasoning, graph, TranscriptStore::new(), config.graph.clone())
}

/// Stream one query; Ctrl-C cancels it.
async fn execute_ask(orchestrator: &QueryOrchestrator, query: &str) -> CliResult {
    let mut events = orchestrator.transcript().subscribe();
    let Some(handle) = orchestrator.submit(query).await else {
        return CliResult::error("Nothing to ask: the question is empty");
    };
    let entry_id = handle.entry_id().to_string();

    let outcome = {
        let mut wait = Box::pin(handle.wait());
        let mut progress = Progress::default();
        loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                event = events.recv() => {
                    progress.on_event(orchestrator.transcript(), &entry_id, event).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    orchestrator.cancel().await;
                }
            }
        }
    };

    match outcome {
        Ok(report) => {
            if let Some(enrichment) = report.enrichment {
                if let Ok(true) = enrichment.await {
                    debug!(entry_id = %entry_id, "Rendering enriched graph");
                }
            }
            match orchestrator.transcript().get(&entry_id).await {
                Some(entry) => CliResult::success(render_entry(&entry)),
                None => CliResult::error("Answer was discarded"),
            }
        }
        Err(e) => {
            let text = match orchestrator.transcript().get(&entry_id).await {
                Some(entry) => render_entry(&entry),
                None => String::new(),
            };
            CliResult::error(format!("{}\nError: {}", text, e))
        }
    }
}

/// Line-oriented session over stdin.
async fn execute_chat(orchestrator: &QueryOrchestrator) -> CliResult {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Ask about algorithms and data structures. Commands: /cancel, /clear, /quit");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return CliResult::error(format!("Failed to read input: {}", e)),
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/cancel" => {
                if !orchestrator.cancel().await {
                    eprintln!("Nothing to cancel");
                }
            }
            "/clear" => {
                orchestrator.clear().await;
                eprintln!("Conversation cleared");
            }
            text => {
                if let Some(handle) = orchestrator.submit(text).await {
                    tokio::spawn(print_when_done(orchestrator.clone(), handle));
                }
            }
        }
    }

    orchestrator.cancel().await;
    CliResult::success("Bye")
}

async fn print_when_done(orchestrator: QueryOrchestrator, handle: QueryHandle) {
    let entry_id = handle.entry_id().to_string();
    let outcome = handle.wait().await;
    let entry = orchestrator.transcript().get(&entry_id).await;

    match (outcome, entry) {
        (Ok(report), Some(entry)) if report.state == QueryState::Completed => {
            println!("{}", render_entry(&entry));
        }
        (Ok(_), _) => eprintln!("[cancelled]"),
        (Err(e), Some(entry)) => {
            println!("{}", render_entry(&entry));
            eprintln!("Error: {}", e);
        }
        (Err(e), None) => eprintln!("Error: {}", e),
    }
}

fn execute_metrics(path: PathBuf, top: usize) -> CliResult {
    let snapshot = match GraphSnapshot::from_json_file(&path) {
        Ok(snapshot) => snapshot,
        Err(e) => return CliResult::error(e.to_string()),
    };
    let metrics = compute_metrics(&snapshot);
    let ranked = top_nodes(&snapshot, &metrics, top);
    CliResult::success(render_metrics(&metrics, &ranked))
}

async fn execute_node(
    client: Arc<BackendClient>,
    config: &Config,
    id: String,
    node_type: String,
    label: Option<String>,
) -> CliResult {
    let label = label.unwrap_or_else(|| id.clone());
    let node = GraphNode::new(id, label, node_type);
    let resolver = NodeDetailResolver::new(client, config.graph.synthetic_prefix.clone());

    let detail = resolver.resolve(&node).await;
    if detail.is_error() {
        CliResult::error(render_detail(&node, &detail))
    } else {
        CliResult::success(render_detail(&node, &detail))
    }
}

/// Prints each step of one entry to stderr as it begins and finishes.
#[derive(Default)]
struct Progress {
    printed: Vec<StepStatus>,
}

impl Progress {
    async fn on_event(
        &mut self,
        transcript: &TranscriptStore,
        entry_id: &str,
        event: Result<TranscriptEvent, broadcast::error::RecvError>,
    ) {
        match event {
            Ok(TranscriptEvent::EntryUpdated { entry_id: updated }) if updated == entry_id => {}
            Ok(_) => return,
            // Lagged: fall through and re-read the entry.
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }

        let Some(entry) = transcript.get(entry_id).await else {
            return;
        };
        for (i, step) in entry.steps.iter().enumerate() {
            if self.printed.get(i) == Some(&step.status) {
                continue;
            }
            eprintln!("{}", render_step(step));
            if i < self.printed.len() {
                self.printed[i] = step.status;
            } else {
                self.printed.push(step.status);
            }
        }
    }
}

/// One line per step: status, agent, type, confidence and duration.
pub fn render_step(step: &ReasoningStep) -> String {
    let marker = match step.status {
        StepStatus::Processing => "…",
        StepStatus::Success => "✓",
        StepStatus::Error => "✗",
        StepStatus::Partial => "~",
    };
    let mut line = format!("  {} {} [{}]", marker, step.agent_name, step.step_type);
    if let Some(confidence) = step.confidence {
        line.push_str(&format!(" {:.0}%", confidence * 100.0));
    }
    if let Some(ms) = step.duration_ms() {
        line.push_str(&format!(" {}ms", ms));
    }
    if !step.description.is_empty() {
        line.push_str(&format!(" - {}", step.description));
    }
    line
}

/// Full assistant answer: steps, text, entities and graph metrics.
pub fn render_entry(entry: &ConversationEntry) -> String {
    let mut output = String::new();

    if !entry.steps.is_empty() {
        let summary = StepAggregator::summarize(&entry.steps);
        output.push_str(&format!(
            "Reasoning ({} of {} steps finished",
            summary.finished, summary.total
        ));
        if let Some(mean) = summary.mean_confidence {
            output.push_str(&format!(", mean confidence {:.0}%", mean * 100.0));
        }
        output.push_str(")\n");
        for step in &entry.steps {
            output.push_str(&render_step(step));
            output.push('\n');
        }
        output.push('\n');
    }

    if entry.cancelled {
        output.push_str("[cancelled]\n");
    } else {
        output.push_str(&entry.text);
        output.push('\n');
    }

    if !entry.reasoning_path.is_empty() {
        output.push_str(&format!("\nPath: {}\n", entry.reasoning_path.join(" → ")));
    }
    if !entry.entities.is_empty() {
        output.push_str(&format!("Entities: {}\n", entry.entities.join(", ")));
    }

    if let Some(graph) = entry.graph.as_ref().filter(|g| !g.is_empty()) {
        let metrics = compute_metrics(graph);
        let ranked = top_nodes(graph, &metrics, 5);
        output.push('\n');
        output.push_str(&render_metrics(&metrics, &ranked));
    }

    output
}

/// Metrics table plus the ranked node list.
pub fn render_metrics(metrics: &GraphMetrics, ranked: &[NodeImportance]) -> String {
    let mut output = String::new();
    output.push_str("Graph Metrics\n");
    output.push_str(RULE);
    output.push_str(&format!("Nodes:                  {}\n", metrics.node_count));
    output.push_str(&format!("Edges:                  {}\n", metrics.edge_count));
    output.push_str(&format!("Average degree:         {:.2}\n", metrics.average_degree));
    output.push_str(&format!("Max degree:             {}\n", metrics.max_degree));
    output.push_str(&format!(
        "Clustering coefficient: {:.3}\n",
        metrics.clustering_coefficient
    ));
    output.push_str(&format!("Diameter:               {}\n", metrics.diameter));
    output.push_str(&format!(
        "Connected components:   {}\n",
        metrics.connected_components
    ));

    if !ranked.is_empty() {
        output.push_str("\nTop nodes\n");
        for (rank, node) in ranked.iter().enumerate() {
            output.push_str(&format!(
                "  {:>2}. {} ({}) degree {} importance {:.3}\n",
                rank + 1,
                node.label,
                node.node_type,
                node.degree,
                node.importance
            ));
        }
    }
    output
}

/// Node detail panel as text.
pub fn render_detail(node: &GraphNode, detail: &NodeDetail) -> String {
    let mut output = format!("{} ({})\n", node.label, node.node_type);
    output.push_str(RULE);

    if let Some(error) = &detail.error {
        output.push_str(&format!("No details available: {}\n", error));
        return output;
    }

    for (key, value) in &detail.basic_info {
        output.push_str(&format!("{}: {}\n", key, display_value(value)));
    }
    for (key, value) in &detail.complexity {
        output.push_str(&format!("complexity.{}: {}\n", key, display_value(value)));
    }

    let sections: [(&str, &Vec<Value>); 8] = [
        ("Algorithms", &detail.algorithms),
        ("Data structures", &detail.data_structures),
        ("Techniques", &detail.techniques),
        ("Related problems", &detail.related_problems),
        ("Solutions", &detail.solutions),
        ("Insights", &detail.insights),
        ("Advantages", &detail.advantages),
        ("Disadvantages", &detail.disadvantages),
    ];
    for (title, items) in sections.iter().filter(|(_, items)| !items.is_empty()) {
        output.push_str(&format!("\n{} ({})\n", title, items.len()));
        for item in items.iter() {
            output.push_str(&format!("  - {}\n", display_value(item)));
        }
    }
    output
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => ["name", "title", "label", "description"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(String::from)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphEdge;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn finished_step(agent: &str, confidence: f64) -> ReasoningStep {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ReasoningStep {
            agent_name: agent.to_string(),
            step_type: "analysis".to_string(),
            description: String::new(),
            status: StepStatus::Success,
            started_at: start,
            ended_at: Some(start + chrono::Duration::milliseconds(250)),
            confidence: Some(confidence),
            result: None,
        }
    }

    #[test]
    fn test_parse_ask_joins_words() {
        let cli = Cli::try_parse_from(["algo-assistant", "ask", "Explain", "binary", "search"])
            .unwrap();
        match cli.command {
            Command::Ask { query } => assert_eq!(query.join(" "), "Explain binary search"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_node_defaults() {
        let cli = Cli::try_parse_from(["algo-assistant", "node", "local_1", "--label", "Heap"])
            .unwrap();
        match cli.command {
            Command::Node {
                id,
                node_type,
                label,
            } => {
                assert_eq!(id, "local_1");
                assert_eq!(node_type, "Concept");
                assert_eq!(label.as_deref(), Some("Heap"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_requires_query() {
        assert!(Cli::try_parse_from(["algo-assistant", "ask"]).is_err());
    }

    #[test]
    fn test_render_step() {
        let line = render_step(&finished_step("QueryAnalyzer", 0.875));
        assert_eq!(line, "  ✓ QueryAnalyzer [analysis] 88% 250ms");
    }

    #[test]
    fn test_render_entry_with_steps_and_graph() {
        let mut entry = ConversationEntry::assistant_placeholder();
        entry.streaming = false;
        entry.text = "Binary search runs in O(log n).".to_string();
        entry.steps = vec![finished_step("QueryAnalyzer", 0.8), finished_step("Synthesizer", 0.6)];
        entry.entities = vec!["binary search".to_string()];
        entry.graph = Some(GraphSnapshot::new(
            vec![
                GraphNode::new("bs", "Binary Search", "Algorithm"),
                GraphNode::new("arr", "Array", "DataStructure"),
            ],
            vec![GraphEdge::new("bs", "arr", "OPERATES_ON")],
            None,
        ));

        let output = render_entry(&entry);
        assert!(output.contains("Reasoning (2 of 2 steps finished, mean confidence 70%)"));
        assert!(output.contains("Binary search runs in O(log n)."));
        assert!(output.contains("Entities: binary search"));
        assert!(output.contains("Nodes:                  2"));
        assert!(output.contains("Edges:                  1"));
    }

    #[test]
    fn test_render_cancelled_entry() {
        let mut entry = ConversationEntry::assistant_placeholder();
        entry.streaming = false;
        entry.cancelled = true;

        assert_eq!(render_entry(&entry), "[cancelled]\n");
    }

    #[test]
    fn test_render_detail_sections() {
        let node = GraphNode::new("qs", "Quick Sort", "Algorithm");
        let detail = NodeDetail::from_response(
            &node,
            json!({
                "complexity": {"average": "O(n log n)"},
                "advantages": ["in-place", {"name": "cache friendly"}],
                "insights": []
            }),
        )
        .unwrap();

        let output = render_detail(&node, &detail);
        assert!(output.starts_with("Quick Sort (Algorithm)\n"));
        assert!(output.contains("name: Quick Sort"));
        assert!(output.contains("complexity.average: O(n log n)"));
        assert!(output.contains("Advantages (2)\n  - in-place\n  - cache friendly\n"));
        assert!(!output.contains("Insights"));
    }

    #[test]
    fn test_render_failed_detail() {
        let node = GraphNode::new("n404", "Unknown", "Concept");
        let detail = NodeDetail::failed(&node, "API error: 404 - not found");
        assert!(render_detail(&node, &detail).contains("No details available: API error: 404"));
    }

    #[test]
    fn test_metrics_command_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"nodes": [{"id": "a", "type": "Algorithm"}, {"id": "b", "type": "Algorithm"}],
                "edges": [{"source": "a", "target": "b", "relationship": "RELATED"}]}"#,
        )
        .unwrap();

        let result = execute_metrics(file.path().to_path_buf(), 10);
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("Connected components:   1"));
        assert!(result.message.contains(" 1. a (Algorithm)"));
    }

    #[test]
    fn test_metrics_command_missing_file() {
        let result = execute_metrics(PathBuf::from("/definitely/not/here.json"), 10);
        assert_eq!(result.exit_code, 1);
        assert!(result.message.contains("Failed to read"));
    }
}
