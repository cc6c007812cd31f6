use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Result attached to a completed step, decoded by `step_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    Analysis(AnalysisResult),
    Retrieval(RetrievalResult),
    Recommendation(RecommendationResult),
    Integration(IntegrationResult),
    /// Unknown step type, or a payload that did not match its shape.
    Other { raw: Value },
}

/// Output of the query analysis stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, alias = "query_type")]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

/// Output of the knowledge retrieval stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    #[serde(default, alias = "nodes_found")]
    pub node_count: Option<usize>,
    #[serde(default, alias = "edges_found")]
    pub edge_count: Option<usize>,
    #[serde(default, alias = "entities")]
    pub entities_found: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Output of the recommendation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    #[serde(default, alias = "recommendations")]
    pub items: Vec<RecommendedItem>,
}

/// One recommended problem or concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default, alias = "score")]
    pub relevance: Option<f64>,
}

/// Output of the final integration stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sources_used: Vec<String>,
}

/// Broad family of a pipeline `step_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Analysis,
    Retrieval,
    Recommendation,
    Integration,
    Other,
}

impl StepKind {
    /// Classify a backend `step_type` string.
    pub fn classify(step_type: &str) -> Self {
        match step_type.to_lowercase().as_str() {
            "analysis" | "analyze" | "query_analysis" | "intent_analysis" => StepKind::Analysis,
            "retrieval"
            | "retrieve"
            | "knowledge_retrieval"
            | "graph_query"
            | "knowledge_graph" => StepKind::Retrieval,
            "recommendation" | "recommend" | "problem_recommendation" => StepKind::Recommendation,
            "integration" | "integrate" | "synthesis" | "response_integration" => {
                StepKind::Integration
            }
            _ => StepKind::Other,
        }
    }
}

impl StepResult {
    /// Decode a raw result by the step type that produced it.
    pub fn decode(step_type: &str, raw: Value) -> Self {
        let decoded = match StepKind::classify(step_type) {
            StepKind::Analysis => serde_json::from_value(raw.clone()).map(StepResult::Analysis),
            StepKind::Retrieval => serde_json::from_value(raw.clone()).map(StepResult::Retrieval),
            StepKind::Recommendation => {
                serde_json::from_value(raw.clone()).map(StepResult::Recommendation)
            }
            StepKind::Integration => {
                serde_json::from_value(raw.clone()).map(StepResult::Integration)
            }
            StepKind::Other => return StepResult::Other { raw },
        };

        decoded.unwrap_or_else(|e| {
            debug!(step_type = %step_type, error = %e, "Step result did not match its shape");
            StepResult::Other { raw }
        })
    }
}
