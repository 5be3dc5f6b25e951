//! Reflection & Retry Controller
//!
//! Asks the completion provider for a verdict over the executed plan and,
//! when the verdict calls for it, re-dispatches exactly the retry-eligible
//! subtasks through `PlanExecutor::dispatch_single`.

use std::sync::Arc;
use std::time::Instant;

use query_cascade_llm::{CompletionProvider, LlmRequestOptions};

use crate::config::EngineConfig;
use crate::services::telemetry::{DecisionRecord, DecisionType, JourneyRecorder};
use crate::utils::error::{AppError, AppResult};

use super::completion::complete_text;
use super::executor::{topological_order, PlanExecutor};
use super::parsing::parse_reflection_response;
use super::prompts::{reflection_prompt, REFLECTION_SYSTEM};
use super::registry::CapabilityRegistry;
use super::session::RunContext;
use super::types::{ExecutionPlan, ReflectionResult};

const REASSIGNMENT_VERBS: &[&str] = &["different", "alternate", "alternative", "another", "switch"];
const REASSIGNMENT_NOUNS: &[&str] = &["capability", "agent", "handler"];

/// True when a retry strategy asks for a different capability in general terms.
pub fn suggests_reassignment(strategy: &str) -> bool {
    let lower = strategy.to_lowercase();
    REASSIGNMENT_VERBS.iter().any(|w| lower.contains(w))
        && REASSIGNMENT_NOUNS.iter().any(|w| lower.contains(w))
}

pub struct ReflectionController {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<CapabilityRegistry>,
    config: Arc<EngineConfig>,
}

impl ReflectionController {
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

    /// Evaluate the plan. Falls back to [`ReflectionResult::fallback`] on any
    /// completion or parse failure.
    pub async fn reflect(
        &self,
        plan: &ExecutionPlan,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> ReflectionResult {
        let started = Instant::now();
        let response = complete_text(
            self.provider.as_ref(),
            REFLECTION_SYSTEM,
            reflection_prompt(plan, run.expertise),
            LlmRequestOptions::with_temperature(self.config.reflection_temperature).json(),
            self.config.completion_timeout(),
            &run.cancel,
        )
        .await;

        let reflection = match response
            .map_err(AppError::from)
            .and_then(|text| parse_reflection_response(&text))
        {
            Ok(reflection) => reflection,
            Err(e) => {
                tracing::warn!(
                    query_id = %run.query_id,
                    error = %e,
                    "[Reflection] using fallback verdict"
                );
                ReflectionResult::fallback()
            }
        };

        journey.record_decision(
            DecisionRecord::new(
                &run.query_id,
                "reflection",
                DecisionType::ConfidenceEvaluation,
                format!("{} subtask(s)", plan.subtasks.len()),
                format!(
                    "Quality: {:.2}, Retry: {}",
                    reflection.quality_score, reflection.should_retry
                ),
            )
            .with_reasoning(reflection.improvement_suggestions.join("; "))
            .with_confidence(reflection.accuracy_confidence)
            .with_processing_time(started.elapsed().as_secs_f64() * 1000.0)
            .with_metadata("fallback", serde_json::json!(reflection.is_fallback))
            .with_metadata(
                "completeness_score",
                serde_json::json!(reflection.completeness_score),
            ),
        );

        reflection
    }

    /// Retry-eligible subtasks in dependency order.
    pub fn retry_targets(&self, plan: &ExecutionPlan) -> Vec<String> {
        let threshold = self.config.low_confidence_threshold;
        let order = topological_order(&plan.subtasks)
            .unwrap_or_else(|_| plan.subtasks.iter().map(|t| t.id.clone()).collect());
        order
            .into_iter()
            .filter(|id| {
                plan.get(id)
                    .map(|t| t.is_retry_eligible(threshold))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Retry happens iff the verdict asks for it and something is eligible.
    pub fn should_retry(&self, reflection: &ReflectionResult, targets: &[String]) -> bool {
        reflection.should_retry && !targets.is_empty()
    }

    /// Capability a retried subtask should move to, if the strategy asks for one.
    ///
    /// A registered capability named in the strategy wins; a generic request
    /// for "another capability" picks the first registered one that differs.
    pub fn reassignment_for(&self, current: &str, strategy: &str) -> Option<String> {
        let lower = strategy.to_lowercase();
        let named = self
            .registry
            .names()
            .iter()
            .find(|name| name.as_str() != current && lower.contains(&name.to_lowercase()));
        if let Some(name) = named {
            return Some(name.clone());
        }
        if suggests_reassignment(strategy) {
            return self.registry.alternative_to(current, strategy);
        }
        None
    }

    /// Re-dispatch `targets` one by one, in the order given. Returns the ids
    /// that were dispatched again.
    pub async fn retry(
        &self,
        executor: &PlanExecutor,
        plan: &mut ExecutionPlan,
        reflection: &ReflectionResult,
        targets: &[String],
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<Vec<String>> {
        let strategy = reflection.retry_strategy.clone().unwrap_or_default();
        let mut reassigned = Vec::new();

        for task_id in targets {
            let Some(task) = plan.get_mut(task_id) else {
                continue;
            };
            if let Some(next) = self.reassignment_for(&task.capability, &strategy) {
                tracing::info!(
                    query_id = %run.query_id,
                    task_id = %task_id,
                    from = %task.capability,
                    to = %next,
                    "[Reflection] reassigning subtask"
                );
                reassigned.push(format!("{}: {} -> {}", task_id, task.capability, next));
                task.capability = next;
            }
        }

        journey.record_decision(
            DecisionRecord::new(
                &run.query_id,
                "reflection",
                DecisionType::RetryDecision,
                strategy.clone(),
                format!("retrying [{}]", targets.join(", ")),
            )
            .with_reasoning(if reassigned.is_empty() {
                "same capabilities".to_string()
            } else {
                reassigned.join("; ")
            })
            .with_confidence(reflection.accuracy_confidence)
            .with_metadata("targets", serde_json::json!(targets)),
        );

        let mut retried = Vec::with_capacity(targets.len());
        for task_id in targets {
            executor.dispatch_single(plan, task_id, run, journey).await?;
            retried.push(task_id.clone());
        }

        tracing::info!(
            query_id = %run.query_id,
            retried = retried.len(),
            "[Reflection] retry pass finished"
        );
        Ok(retried)
    }
}
