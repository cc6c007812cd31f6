//! Reasoning step aggregation.
//!
//! The backend pipeline reports each stage twice: once when an agent starts
//! (`begin`) and once when it finishes (`complete`). [`StepAggregator`] folds
//! those events into an ordered list of [`ReasoningStep`]s on a transcript
//! entry. Steps keep the arrival order of their first event, completions
//! update steps in place, and completions that arrive without a matching
//! begin are kept rather than dropped.

mod result;

pub use result::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{StepCompletePayload, StepPayload};

/// Lifecycle status of a reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Agent is still working.
    #[serde(alias = "running", alias = "in_progress", alias = "pending")]
    Processing,
    /// Agent finished normally.
    #[serde(alias = "completed", alias = "done", alias = "ok")]
    Success,
    /// Agent failed.
    #[serde(alias = "failed", alias = "failure")]
    Error,
    /// Agent finished with an incomplete answer.
    #[serde(alias = "partial_success")]
    Partial,
}

impl StepStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Processing => "processing",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Partial => "partial",
        }
    }

    /// True for any status other than `processing`.
    pub fn is_finished(&self) -> bool {
        !matches!(self, StepStatus::Processing)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stage of the reasoning pipeline as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub agent_name: String,
    pub step_type: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Always within `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl ReasoningStep {
    fn matches(&self, agent_name: &str, step_type: &str) -> bool {
        self.agent_name == agent_name && self.step_type == step_type
    }

    /// Wall-clock duration of a finished step.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0))
    }
}

/// A step has started.
#[derive(Debug, Clone, PartialEq)]
pub struct StepBegin {
    pub agent_name: String,
    pub step_type: String,
    pub description: String,
    pub time: DateTime<Utc>,
    pub confidence: Option<f64>,
}

/// A step has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub agent_name: String,
    pub step_type: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub confidence: Option<f64>,
    pub result: Option<StepResult>,
}

/// Event routed to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Begin(StepBegin),
    Complete(StepCompletion),
}

impl From<StepPayload> for StepBegin {
    fn from(payload: StepPayload) -> Self {
        Self {
            agent_name: payload.agent_name,
            step_type: payload.step_type,
            description: payload.description,
            time: payload
                .start_time
                .and_then(|t| t.to_datetime())
                .unwrap_or_else(Utc::now),
            confidence: payload.confidence.map(clamp_confidence),
        }
    }
}

impl From<StepCompletePayload> for StepCompletion {
    fn from(payload: StepCompletePayload) -> Self {
        let ended_at = payload
            .end_time
            .and_then(|t| t.to_datetime())
            .unwrap_or_else(Utc::now);
        let started_at = payload
            .start_time
            .and_then(|t| t.to_datetime())
            .unwrap_or(ended_at);
        let result = payload
            .result
            .map(|raw| StepResult::decode(&payload.step_type, raw));

        Self {
            agent_name: payload.agent_name,
            step_type: payload.step_type,
            description: payload.description,
            status: payload.status,
            started_at,
            ended_at,
            confidence: payload.confidence.map(clamp_confidence),
            result,
        }
    }
}

impl From<StepPayload> for StepEvent {
    fn from(payload: StepPayload) -> Self {
        StepEvent::Begin(payload.into())
    }
}

impl From<StepCompletePayload> for StepEvent {
    fn from(payload: StepCompletePayload) -> Self {
        StepEvent::Complete(payload.into())
    }
}

/// Clamp a reported confidence into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Folds step events into an entry's step list.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepAggregator;

impl StepAggregator {
    /// Apply one event to `steps`.
    pub fn on_step_event(steps: &mut Vec<ReasoningStep>, event: StepEvent) {
        match event {
            StepEvent::Begin(begin) => Self::begin(steps, begin),
            StepEvent::Complete(completion) => Self::complete(steps, completion),
        }
    }

    fn begin(steps: &mut Vec<ReasoningStep>, begin: StepBegin) {
        let duplicate = steps
            .iter()
            .any(|step| step.matches(&begin.agent_name, &begin.step_type));
        if duplicate {
            debug!(
                agent = %begin.agent_name,
                step_type = %begin.step_type,
                "Ignoring duplicate step begin"
            );
            return;
        }

        steps.push(ReasoningStep {
            agent_name: begin.agent_name,
            step_type: begin.step_type,
            description: begin.description,
            status: StepStatus::Processing,
            started_at: begin.time,
            ended_at: None,
            confidence: begin.confidence,
            result: None,
        });
    }

    fn complete(steps: &mut Vec<ReasoningStep>, completion: StepCompletion) {
        let open = steps.iter_mut().rev().find(|step| {
            step.matches(&completion.agent_name, &completion.step_type)
                && step.status == StepStatus::Processing
        });

        match open {
            Some(step) => {
                step.status = completion.status;
                step.ended_at = Some(completion.ended_at);
                if completion.confidence.is_some() {
                    step.confidence = completion.confidence;
                }
                step.result = completion.result;
                if !completion.description.is_empty() {
                    step.description = completion.description;
                }
            }
            None => {
                debug!(
                    agent = %completion.agent_name,
                    step_type = %completion.step_type,
                    "Completion without open step, appending"
                );
                steps.push(ReasoningStep {
                    agent_name: completion.agent_name,
                    step_type: completion.step_type,
                    description: completion.description,
                    status: completion.status,
                    started_at: completion.started_at,
                    ended_at: Some(completion.ended_at),
                    confidence: completion.confidence,
                    result: completion.result,
                });
            }
        }
    }

    /// Counts and mean confidence over a step list.
    pub fn summarize(steps: &[ReasoningStep]) -> StepSummary {
        let finished: Vec<&ReasoningStep> =
            steps.iter().filter(|s| s.status.is_finished()).collect();
        let confidences: Vec<f64> = finished.iter().filter_map(|s| s.confidence).collect();

        StepSummary {
            total: steps.len(),
            finished: finished.len(),
            in_progress: steps.len() - finished.len(),
            failed: finished
                .iter()
                .filter(|s| s.status == StepStatus::Error)
                .count(),
            mean_confidence: if confidences.is_empty() {
                None
            } else {
                Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
            },
        }
    }
}

/// Aggregate view of a step list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub total: usize,
    pub finished: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub mean_confidence: Option<f64>,
}
