//! Journey Recorder
//!
//! Collects the decisions and interactions of one query, forwards each to the
//! sink as it happens, and produces the final `QueryJourney`. `finalize`
//! consumes the recorder, so a journey is built exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use query_cascade_core::ExpertiseLevel;

use crate::services::planning::types::ExecutionPlan;

use super::sink::TelemetrySink;
use super::types::{
    DecisionRecord, InteractionRecord, QueryJourney, SubTaskOutcome, TelemetryEvent,
};

pub struct JourneyRecorder {
    query_id: String,
    query: String,
    expertise: ExpertiseLevel,
    plan_id: Option<String>,
    started_at: DateTime<Utc>,
    decisions: Vec<DecisionRecord>,
    interactions: Vec<InteractionRecord>,
    sink: Arc<dyn TelemetrySink>,
}

impl JourneyRecorder {
    pub fn new(
        query_id: impl Into<String>,
        query: impl Into<String>,
        expertise: ExpertiseLevel,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            query: query.into(),
            expertise,
            plan_id: None,
            started_at: Utc::now(),
            decisions: Vec::new(),
            interactions: Vec::new(),
            sink,
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn set_plan_id(&mut self, plan_id: impl Into<String>) {
        self.plan_id = Some(plan_id.into());
    }

    pub fn record_decision(&mut self, decision: DecisionRecord) {
        self.sink.record(TelemetryEvent::Decision(decision.clone()));
        self.decisions.push(decision);
    }

    pub fn record_interaction(&mut self, interaction: InteractionRecord) {
        self.sink
            .record(TelemetryEvent::Interaction(interaction.clone()));
        self.interactions.push(interaction);
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub fn interactions(&self) -> &[InteractionRecord] {
        &self.interactions
    }

    /// Close the journey, hand it to the sink and return a copy.
    pub fn finalize(
        self,
        plan: Option<&ExecutionPlan>,
        success: bool,
        final_confidence: f64,
        error_message: Option<String>,
    ) -> QueryJourney {
        let subtask_outcomes = plan
            .map(|p| p.subtasks.iter().map(SubTaskOutcome::from).collect())
            .unwrap_or_default();

        let journey = QueryJourney {
            query_id: self.query_id,
            query: self.query,
            user_expertise_level: self.expertise,
            plan_id: self.plan_id.or_else(|| plan.map(|p| p.id.clone())),
            started_at: self.started_at,
            finished_at: Utc::now(),
            decisions: self.decisions,
            interactions: self.interactions,
            subtask_outcomes,
            final_confidence: final_confidence.clamp(0.0, 1.0),
            success,
            error_message,
        };

        tracing::info!(
            query_id = %journey.query_id,
            success = journey.success,
            confidence = journey.final_confidence,
            duration_ms = journey.duration_ms(),
            "[Journey] finalized"
        );
        self.sink.record(TelemetryEvent::Journey(journey.clone()));
        journey
    }
}
