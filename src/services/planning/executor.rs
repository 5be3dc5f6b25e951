//! Dependency-Ordered Executor
//!
//! Runs an `ExecutionPlan` as a sequence of wavefronts computed with Kahn's
//! algorithm. Subtasks inside one wavefront are dispatched concurrently,
//! bounded per capability by a semaphore. Plan mutation happens only between
//! dispatch rounds, on the task that owns the plan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use query_cascade_core::{
    Capability, CapabilityContext, ContextMetadata, DependencyOutput, SourceKind, SourceRef,
};
use query_cascade_llm::{CompletionProvider, LlmError, LlmRequestOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use crate::services::telemetry::{
    DecisionRecord, DecisionType, InteractionKind, InteractionRecord, JourneyRecorder,
};
use crate::utils::error::{AppError, AppResult};
use crate::utils::text::{truncate_chars, truncate_with_marker};

use super::completion::complete_text;
use super::prompts::{capability_fallback_prompt, FALLBACK_SYSTEM};
use super::registry::{CapabilityRegistry, Resolution};
use super::session::RunContext;
use super::types::{CompletedAttempt, ExecutionPlan, SubTask, SubTaskOutput, SubTaskStatus};

/// Label of the completion provider when it stands in for a capability.
pub const COMPLETION_FALLBACK: &str = "completion_fallback";

/// Confidence assigned to output produced by the completion fallback.
pub const COMPLETION_FALLBACK_CONFIDENCE: f64 = 0.6;

const FALLBACK_TEMPERATURE: f32 = 0.3;

// ============================================================================
// Wavefronts
// ============================================================================

/// Subtasks whose dependencies all belong to earlier wavefronts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wavefront {
    pub index: usize,
    pub task_ids: Vec<String>,
}

/// Structural checks that must pass before anything is dispatched.
pub fn validate_plan(subtasks: &[SubTask]) -> AppResult<()> {
    if subtasks.is_empty() {
        return Err(AppError::plan("plan has no subtasks"));
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(subtasks.len());
    for task in subtasks {
        if !ids.insert(task.id.as_str()) {
            return Err(AppError::plan(format!("duplicate subtask id '{}'", task.id)));
        }
    }

    for task in subtasks {
        if let Some(missing) = task
            .dependencies
            .iter()
            .find(|dep| !ids.contains(dep.as_str()))
        {
            return Err(AppError::plan(format!(
                "subtask '{}' depends on unknown subtask '{}'",
                task.id, missing
            )));
        }
    }
    Ok(())
}

/// Calculate wavefronts using Kahn's algorithm.
///
/// Subtasks keep their plan order inside a wavefront. Ids still unresolved
/// when no subtask is ready form a cycle and are returned in
/// [`AppError::CyclicPlan`].
pub fn calculate_wavefronts(subtasks: &[SubTask]) -> AppResult<Vec<Wavefront>> {
    validate_plan(subtasks)?;

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in subtasks {
        in_degree.entry(task.id.as_str()).or_insert(0);
        let unique: HashSet<&str> = task.dependencies.iter().map(String::as_str).collect();
        for dep in unique {
            *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(task.id.as_str());
        }
    }

    let mut remaining: Vec<&str> = subtasks.iter().map(|t| t.id.as_str()).collect();
    let mut wavefronts = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        if ready.is_empty() {
            return Err(AppError::CyclicPlan(
                remaining.iter().map(|id| id.to_string()).collect(),
            ));
        }

        for id in &ready {
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
        }
        remaining.retain(|id| !ready.contains(id));

        wavefronts.push(Wavefront {
            index: wavefronts.len(),
            task_ids: ready.iter().map(|id| id.to_string()).collect(),
        });
    }

    Ok(wavefronts)
}

/// Flattened wavefront order.
pub fn topological_order(subtasks: &[SubTask]) -> AppResult<Vec<String>> {
    Ok(calculate_wavefronts(subtasks)?
        .into_iter()
        .flat_map(|w| w.task_ids)
        .collect())
}

/// Mark every non-terminal subtask `skipped`. Returns how many were skipped.
pub fn skip_unfinished(plan: &mut ExecutionPlan, reason: &str) -> usize {
    let mut skipped = 0;
    for task in plan.subtasks.iter_mut() {
        if !task.status.is_terminal() && task.skip(reason).is_ok() {
            skipped += 1;
        }
    }
    skipped
}

/// Truncate dependency outputs to fit within budget.
fn truncate_dependency_outputs(
    deps: Vec<DependencyOutput>,
    max_per_dep: usize,
    max_total: usize,
) -> Vec<DependencyOutput> {
    let mut total_chars = 0;
    let mut result = Vec::new();

    for mut dep in deps {
        if total_chars >= max_total {
            break;
        }
        let limit = (max_total - total_chars).min(max_per_dep);
        dep.content = truncate_with_marker(&dep.content, limit);
        total_chars += dep.content.chars().count();
        result.push(dep);
    }

    result
}

// ============================================================================
// Executor
// ============================================================================

enum Target {
    Capability(Arc<dyn Capability>),
    CompletionFallback { prompt: String },
}

/// Everything one dispatch needs, detached from the plan.
struct Dispatch {
    task_id: String,
    requested: String,
    kind: InteractionKind,
    target: Target,
    context: CapabilityContext,
}

struct Outcome {
    task_id: String,
    requested: String,
    capability: String,
    kind: InteractionKind,
    input: String,
    elapsed_ms: u64,
    result: Result<(SubTaskOutput, f64), String>,
}

pub struct PlanExecutor {
    registry: Arc<CapabilityRegistry>,
    provider: Arc<dyn CompletionProvider>,
    config: Arc<EngineConfig>,
    limits: HashMap<String, Arc<Semaphore>>,
}

impl PlanExecutor {
    /// One in-flight limiter per registered capability plus one for the
    /// completion fallback. Limits are shared by every plan this executor runs.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        provider: Arc<dyn CompletionProvider>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let mut limits = HashMap::new();
        for name in registry
            .names()
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(COMPLETION_FALLBACK))
        {
            let permits = config.in_flight_limit(name).max(1);
            limits.insert(name.to_string(), Arc::new(Semaphore::new(permits)));
        }
        Self {
            registry,
            provider,
            config,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run every subtask to a terminal state.
    ///
    /// Plan errors (cycle, unknown dependency, duplicate id) are returned
    /// before anything is dispatched. Subtask failures never abort the run.
    pub async fn execute(
        &self,
        plan: &mut ExecutionPlan,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<()> {
        let wavefronts = calculate_wavefronts(&plan.subtasks)?;
        let started = Instant::now();

        tracing::info!(
            query_id = %run.query_id,
            plan_id = %plan.id,
            subtasks = plan.subtasks.len(),
            wavefronts = wavefronts.len(),
            "[Executor] starting plan"
        );

        for wavefront in &wavefronts {
            if run.is_cancelled() {
                return Err(self.abort(plan, run));
            }

            let mut dispatches = Vec::new();
            for task_id in &wavefront.task_ids {
                if let Some(reason) = blocked_by(plan, task_id) {
                    if let Some(task) = plan.get_mut(task_id) {
                        task.skip(reason.clone())?;
                    }
                    tracing::debug!(
                        query_id = %run.query_id,
                        task_id = %task_id,
                        reason = %reason,
                        "[Executor] subtask skipped"
                    );
                    continue;
                }
                dispatches.push(self.prepare(plan, task_id, run, journey)?);
            }

            if dispatches.is_empty() {
                continue;
            }

            tracing::debug!(
                query_id = %run.query_id,
                wavefront = wavefront.index,
                dispatches = dispatches.len(),
                "[Executor] dispatching wavefront"
            );

            let round = join_all(dispatches.into_iter().map(|d| self.run_dispatch(d, run)));
            let outcomes = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(self.abort(plan, run)),
                outcomes = round => outcomes,
            };

            for outcome in outcomes {
                self.apply_outcome(plan, outcome, None, run, journey)?;
            }
        }

        let counts = plan.status_counts();
        tracing::info!(
            query_id = %run.query_id,
            completed = counts.completed,
            failed = counts.failed,
            skipped = counts.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[Executor] plan finished"
        );
        Ok(())
    }

    /// Re-dispatch one subtask outside the wavefront loop.
    ///
    /// A subtask whose dependencies are no longer all `completed` is moved to
    /// `skipped` instead of being dispatched. When a `completed` subtask is
    /// re-dispatched and the new attempt fails or is cancelled, the earlier
    /// output is kept, so a subtask never leaves `completed` under dependents
    /// that already consumed its output.
    pub async fn dispatch_single(
        &self,
        plan: &mut ExecutionPlan,
        task_id: &str,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<()> {
        if plan.get(task_id).is_none() {
            return Err(AppError::plan(format!("unknown subtask '{}'", task_id)));
        }
        if run.is_cancelled() {
            return Err(self.abort(plan, run));
        }

        if let Some(reason) = blocked_by(plan, task_id) {
            if let Some(task) = plan.get_mut(task_id) {
                if task.status == SubTaskStatus::Pending {
                    task.skip(reason)?;
                } else if task.status != SubTaskStatus::Skipped {
                    task.start()?;
                    task.skip(reason)?;
                }
            }
            return Ok(());
        }

        let previous = plan.get(task_id).and_then(SubTask::completed_attempt);
        let dispatch = self.prepare(plan, task_id, run, journey)?;
        let outcome = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => {
                if let (Some(attempt), Some(task)) = (previous, plan.get_mut(task_id)) {
                    task.restore(attempt, "retry cancelled")?;
                }
                return Err(self.abort(plan, run));
            }
            outcome = self.run_dispatch(dispatch, run) => outcome,
        };
        self.apply_outcome(plan, outcome, previous, run, journey)
    }

    fn abort(&self, plan: &mut ExecutionPlan, run: &RunContext) -> AppError {
        let skipped = skip_unfinished(plan, "cancelled");
        tracing::warn!(
            query_id = %run.query_id,
            skipped,
            "[Executor] query cancelled"
        );
        AppError::Cancelled
    }

    /// Resolve the capability, build the context and move the subtask to
    /// `in_progress`.
    fn prepare(
        &self,
        plan: &mut ExecutionPlan,
        task_id: &str,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<Dispatch> {
        let task = plan
            .get(task_id)
            .ok_or_else(|| AppError::plan(format!("unknown subtask '{}'", task_id)))?;
        let requested = task.capability.clone();
        let context = self.build_context(plan, task, run);
        let kind = if task.attempts == 0 {
            InteractionKind::Dispatch
        } else {
            InteractionKind::Retry
        };

        let target = match self
            .registry
            .resolve(&requested, &self.config.default_capability)
        {
            Resolution::Registered(capability) => Target::Capability(capability),
            Resolution::Substituted {
                requested,
                capability,
            } => {
                tracing::warn!(
                    query_id = %run.query_id,
                    task_id = %task_id,
                    requested = %requested,
                    capability = %capability.name(),
                    "[Executor] capability not registered, using default"
                );
                journey.record_decision(
                    DecisionRecord::new(
                        &run.query_id,
                        "executor",
                        DecisionType::ErrorHandling,
                        format!("{}: {}", task_id, requested),
                        capability.name(),
                    )
                    .with_reasoning(format!(
                        "capability '{}' is not registered; substituted the default",
                        requested
                    ))
                    .with_confidence(1.0),
                );
                Target::Capability(capability)
            }
            Resolution::Unavailable => {
                tracing::warn!(
                    query_id = %run.query_id,
                    task_id = %task_id,
                    requested = %requested,
                    "[Executor] no capability available, using completion fallback"
                );
                journey.record_decision(
                    DecisionRecord::new(
                        &run.query_id,
                        "executor",
                        DecisionType::ErrorHandling,
                        format!("{}: {}", task_id, requested),
                        COMPLETION_FALLBACK,
                    )
                    .with_reasoning(
                        "neither the requested nor the default capability is registered",
                    )
                    .with_confidence(COMPLETION_FALLBACK_CONFIDENCE),
                );
                Target::CompletionFallback {
                    prompt: capability_fallback_prompt(task, &plan.original_query, run.expertise),
                }
            }
        };

        let task = plan
            .get_mut(task_id)
            .ok_or_else(|| AppError::plan(format!("unknown subtask '{}'", task_id)))?;
        if let Target::Capability(capability) = &target {
            if capability.name() != task.capability {
                task.capability = capability.name().to_string();
            }
        }
        task.start()?;

        Ok(Dispatch {
            task_id: task_id.to_string(),
            requested,
            kind,
            target,
            context,
        })
    }

    fn build_context(
        &self,
        plan: &ExecutionPlan,
        task: &SubTask,
        run: &RunContext,
    ) -> CapabilityContext {
        let dependency_outputs: Vec<DependencyOutput> = task
            .dependencies
            .iter()
            .filter_map(|dep| plan.get(dep))
            .filter(|dep| dep.status == SubTaskStatus::Completed)
            .filter_map(|dep| {
                dep.output.as_ref().map(|output| DependencyOutput {
                    task_id: dep.id.clone(),
                    description: dep.description.clone(),
                    content: output.content.clone(),
                })
            })
            .collect();

        CapabilityContext {
            query_id: run.query_id.clone(),
            query: task.description.clone(),
            user_expertise_level: run.expertise,
            metadata: ContextMetadata {
                task_id: Some(task.id.clone()),
                parent_plan_id: Some(plan.id.clone()),
                original_query: Some(plan.original_query.clone()),
                input_requirements: task.input_requirements.clone(),
                expected_output: task.expected_output.clone(),
                dependency_outputs: truncate_dependency_outputs(
                    dependency_outputs,
                    self.config.max_dependency_output_chars,
                    self.config.max_total_dependency_chars,
                ),
                extra: Default::default(),
            },
        }
    }

    /// Wait for a permit, then invoke the target under the dispatch timeout.
    /// The timeout starts once the permit is held.
    async fn run_dispatch(&self, dispatch: Dispatch, run: &RunContext) -> Outcome {
        let Dispatch {
            task_id,
            requested,
            kind,
            target,
            context,
        } = dispatch;

        let capability = match &target {
            Target::Capability(cap) => cap.name().to_string(),
            Target::CompletionFallback { .. } => COMPLETION_FALLBACK.to_string(),
        };
        let input = truncate_chars(&context.query, 200).to_string();

        let limiter = self.limits.get(&capability).cloned();
        let _permit = match limiter {
            Some(semaphore) => match semaphore.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Outcome {
                        task_id,
                        requested,
                        capability,
                        kind,
                        input,
                        elapsed_ms: 0,
                        result: Err("capability limiter closed".to_string()),
                    };
                }
            },
            None => None,
        };

        let timeout = self.config.capability_timeout();
        let started = Instant::now();

        let result = match &target {
            Target::Capability(cap) => {
                match tokio::time::timeout(timeout, cap.process(&context)).await {
                    Ok(Ok(response)) => Ok((
                        SubTaskOutput {
                            content: response.content,
                            sources: response.sources,
                            produced_by: capability.clone(),
                            via_fallback: false,
                        },
                        response.confidence,
                    )),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("timeout".to_string()),
                }
            }
            Target::CompletionFallback { prompt } => {
                match complete_text(
                    self.provider.as_ref(),
                    FALLBACK_SYSTEM,
                    prompt.clone(),
                    LlmRequestOptions::with_temperature(FALLBACK_TEMPERATURE),
                    timeout,
                    &run.cancel,
                )
                .await
                {
                    Ok(text) => {
                        let source = SourceRef::new(
                            SourceKind::CompletionFallback,
                            format!("{}:{}", COMPLETION_FALLBACK, requested),
                            text.clone(),
                            COMPLETION_FALLBACK_CONFIDENCE,
                        );
                        Ok((
                            SubTaskOutput {
                                content: text,
                                sources: vec![source],
                                produced_by: COMPLETION_FALLBACK.to_string(),
                                via_fallback: true,
                            },
                            COMPLETION_FALLBACK_CONFIDENCE,
                        ))
                    }
                    Err(LlmError::Timeout { .. }) => Err("timeout".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        };

        Outcome {
            task_id,
            requested,
            capability,
            kind,
            input,
            elapsed_ms: started.elapsed().as_millis() as u64,
            result,
        }
    }

    fn apply_outcome(
        &self,
        plan: &mut ExecutionPlan,
        outcome: Outcome,
        previous: Option<CompletedAttempt>,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<()> {
        let task = plan
            .get_mut(&outcome.task_id)
            .ok_or_else(|| AppError::plan(format!("unknown subtask '{}'", outcome.task_id)))?;

        let mut record = InteractionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            parent_query_id: run.query_id.clone(),
            task_id: outcome.task_id.clone(),
            requested_capability: outcome.requested,
            capability: outcome.capability.clone(),
            kind: outcome.kind,
            input: outcome.input,
            success: false,
            confidence: None,
            processing_time_ms: outcome.elapsed_ms as f64,
            error_message: None,
            timestamp: chrono::Utc::now(),
        };

        match outcome.result {
            Ok((output, confidence)) => {
                task.complete(output, confidence, outcome.elapsed_ms)?;
                record.success = true;
                record.confidence = task.confidence;
                tracing::debug!(
                    query_id = %run.query_id,
                    task_id = %outcome.task_id,
                    capability = %outcome.capability,
                    confidence = task.effective_confidence(),
                    elapsed_ms = outcome.elapsed_ms,
                    "[Executor] subtask completed"
                );
            }
            Err(message) => {
                tracing::warn!(
                    query_id = %run.query_id,
                    task_id = %outcome.task_id,
                    capability = %outcome.capability,
                    error = %message,
                    "[Executor] subtask failed"
                );
                match previous {
                    Some(attempt) => {
                        tracing::warn!(
                            query_id = %run.query_id,
                            task_id = %outcome.task_id,
                            "[Executor] retry failed, keeping previous output"
                        );
                        task.restore(attempt, message.clone())?;
                    }
                    None => task.fail(message.clone(), outcome.elapsed_ms)?,
                }
                record.error_message = Some(message);
            }
        }

        journey.record_interaction(record);
        Ok(())
    }
}

/// Reason a subtask cannot run, if any dependency did not complete.
fn blocked_by(plan: &ExecutionPlan, task_id: &str) -> Option<String> {
    let task = plan.get(task_id)?;
    task.dependencies.iter().find_map(|dep_id| match plan.get(dep_id) {
        Some(dep) if dep.status == SubTaskStatus::Completed => None,
        Some(dep) => Some(format!("dependency {} {}", dep.id, dep.status)),
        None => Some(format!("dependency {} missing", dep_id)),
    })
}
