//! Telemetry Types
//!
//! Decision and interaction records streamed while a query runs, and the
//! `QueryJourney` summarizing the whole query once it finishes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use query_cascade_core::ExpertiseLevel;
use serde::{Deserialize, Serialize};

use crate::services::planning::types::{SubTask, SubTaskStatus};

/// What kind of choice a component made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    CapabilitySelection,
    ConfidenceEvaluation,
    RetrievalStrategy,
    ResponseGeneration,
    ErrorHandling,
    RetryDecision,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::CapabilitySelection => "capability_selection",
            DecisionType::ConfidenceEvaluation => "confidence_evaluation",
            DecisionType::RetrievalStrategy => "retrieval_strategy",
            DecisionType::ResponseGeneration => "response_generation",
            DecisionType::ErrorHandling => "error_handling",
            DecisionType::RetryDecision => "retry_decision",
        }
    }
}

/// One decision taken by a pipeline component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub id: String,
    pub parent_query_id: String,
    /// Component or capability that decided (`planner`, `reflection`, ...).
    pub agent_name: String,
    pub decision_type: DecisionType,
    pub input: String,
    pub output_decision: String,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: f64,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DecisionRecord {
    pub fn new(
        parent_query_id: impl Into<String>,
        agent_name: impl Into<String>,
        decision_type: DecisionType,
        input: impl Into<String>,
        output_decision: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_query_id: parent_query_id.into(),
            agent_name: agent_name.into(),
            decision_type,
            input: input.into(),
            output_decision: output_decision.into(),
            reasoning: String::new(),
            confidence: 0.0,
            processing_time_ms: 0.0,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_processing_time(mut self, ms: f64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// First dispatch of a subtask inside a wavefront.
    Dispatch,
    /// Targeted re-dispatch requested by reflection.
    Retry,
}

/// One capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub id: String,
    pub parent_query_id: String,
    pub task_id: String,
    /// Capability the subtask asked for.
    pub requested_capability: String,
    /// Capability that actually ran (`completion_fallback` for the provider).
    pub capability: String,
    pub kind: InteractionKind,
    pub input: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Final state of one subtask as seen by the journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskOutcome {
    pub task_id: String,
    pub capability: String,
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl From<&SubTask> for SubTaskOutcome {
    fn from(task: &SubTask) -> Self {
        Self {
            task_id: task.id.clone(),
            capability: task.capability.clone(),
            status: task.status,
            confidence: task.confidence,
            execution_time_ms: task.execution_time_ms,
            error_message: task.error_message.clone(),
            attempts: task.attempts,
        }
    }
}

/// Record of one query's lifecycle. Produced once by
/// `JourneyRecorder::finalize` and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJourney {
    pub query_id: String,
    pub query: String,
    pub user_expertise_level: ExpertiseLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub decisions: Vec<DecisionRecord>,
    pub interactions: Vec<InteractionRecord>,
    pub subtask_outcomes: Vec<SubTaskOutcome>,
    pub final_confidence: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl QueryJourney {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Everything a sink can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Decision(DecisionRecord),
    Interaction(InteractionRecord),
    Journey(QueryJourney),
}

impl TelemetryEvent {
    pub fn query_id(&self) -> &str {
        match self {
            TelemetryEvent::Decision(d) => &d.parent_query_id,
            TelemetryEvent::Interaction(i) => &i.parent_query_id,
            TelemetryEvent::Journey(j) => &j.query_id,
        }
    }
}
