//! Plan Synthesizer
//!
//! Turns a query into an `ExecutionPlan` through the completion provider.
//! Any failure (no capabilities registered, provider error, timeout,
//! unparseable output) yields the single-task fallback plan, so the executor
//! always receives a structurally valid plan.

use std::sync::Arc;
use std::time::Instant;

use query_cascade_llm::{CompletionProvider, LlmRequestOptions};

use crate::config::EngineConfig;
use crate::services::telemetry::{DecisionRecord, DecisionType, JourneyRecorder};
use crate::utils::error::AppResult;

use super::completion::complete_text;
use super::parsing::{fallback_plan, parse_plan_response};
use super::prompts::{plan_repair_prompt, planning_prompt, PLANNER_SYSTEM};
use super::registry::{CapabilityInfo, CapabilityRegistry};
use super::session::RunContext;
use super::types::ExecutionPlan;

pub struct PlanSynthesizer {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<CapabilityRegistry>,
    config: Arc<EngineConfig>,
}

impl PlanSynthesizer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<CapabilityRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
        }
    }

    /// Produce a plan for `query`. Never fails; emits one decision record.
    pub async fn synthesize(
        &self,
        query: &str,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> ExecutionPlan {
        let started = Instant::now();
        let capabilities = self.registry.list();

        let (plan, fallback_reason) = if capabilities.is_empty() {
            (
                fallback_plan(query, &self.config.default_capability),
                Some("no capabilities registered".to_string()),
            )
        } else {
            match self.request_plan(query, run, &capabilities).await {
                Ok(plan) => (plan, None),
                Err(e) => (
                    fallback_plan(query, &self.config.default_capability),
                    Some(e.to_string()),
                ),
            }
        };

        if let Some(reason) = &fallback_reason {
            tracing::warn!(
                query_id = %run.query_id,
                reason = %reason,
                "[Planner] using single-task fallback plan"
            );
        } else {
            tracing::info!(
                query_id = %run.query_id,
                subtasks = plan.subtasks.len(),
                complexity = plan.complexity_score,
                "[Planner] plan created"
            );
        }

        let mut selected: Vec<&str> = Vec::new();
        for task in &plan.subtasks {
            if !selected.contains(&task.capability.as_str()) {
                selected.push(task.capability.as_str());
            }
        }

        journey.record_decision(
            DecisionRecord::new(
                &run.query_id,
                "planner",
                DecisionType::CapabilitySelection,
                query,
                format!(
                    "{} subtask(s) using [{}]",
                    plan.subtasks.len(),
                    selected.join(", ")
                ),
            )
            .with_reasoning(match &fallback_reason {
                Some(reason) => format!("fallback plan: {}", reason),
                None => plan.summary.clone(),
            })
            .with_confidence(plan.confidence_prediction)
            .with_processing_time(started.elapsed().as_secs_f64() * 1000.0)
            .with_metadata("fallback", serde_json::json!(plan.is_fallback))
            .with_metadata("complexity_score", serde_json::json!(plan.complexity_score))
            .with_metadata("plan_id", serde_json::json!(plan.id)),
        );

        plan
    }

    async fn request_plan(
        &self,
        query: &str,
        run: &RunContext,
        capabilities: &[CapabilityInfo],
    ) -> AppResult<ExecutionPlan> {
        let prompt = planning_prompt(query, run.expertise, capabilities);
        let mut text = complete_text(
            self.provider.as_ref(),
            PLANNER_SYSTEM,
            prompt,
            LlmRequestOptions::with_temperature(self.config.planning_temperature).json(),
            self.config.completion_timeout(),
            &run.cancel,
        )
        .await?;

        let mut attempt = 0;
        loop {
            match parse_plan_response(&text, query, &self.config.default_capability) {
                Ok(plan) => return Ok(plan),
                Err(parse_error) if attempt < self.config.plan_repair_attempts => {
                    attempt += 1;
                    tracing::debug!(
                        query_id = %run.query_id,
                        attempt,
                        error = %parse_error,
                        "[Planner] asking the model to repair its plan"
                    );
                    text = complete_text(
                        self.provider.as_ref(),
                        PLANNER_SYSTEM,
                        plan_repair_prompt(query, &text, &parse_error.to_string()),
                        LlmRequestOptions::with_temperature(0.1).json(),
                        self.config.completion_timeout(),
                        &run.cancel,
                    )
                    .await?;
                }
                Err(parse_error) => return Err(parse_error),
            }
        }
    }
}
