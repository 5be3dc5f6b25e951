//! Query Engine
//!
//! Runs one query through planning, wavefront execution, reflection with
//! targeted retry, and synthesis. Per-query state lives in a `QuerySession`
//! owned by the caller; the engine itself is shared and holds only
//! read-only components.

use std::sync::Arc;
use std::time::Instant;

use query_cascade_core::ExpertiseLevel;
use query_cascade_llm::CompletionProvider;

use crate::config::EngineConfig;
use crate::services::telemetry::{JourneyRecorder, NoopSink, TelemetrySink};
use crate::utils::error::{AppError, AppResult};

use super::executor::PlanExecutor;
use super::planner::PlanSynthesizer;
use super::reflection::ReflectionController;
use super::registry::CapabilityRegistry;
use super::session::{QuerySession, RunContext};
use super::synthesizer::{ResponseSynthesizer, Synthesis};
use super::types::{ExecutionPlan, QueryAnswer};

pub struct QueryEngine {
    registry: Arc<CapabilityRegistry>,
    config: Arc<EngineConfig>,
    planner: PlanSynthesizer,
    executor: PlanExecutor,
    reflection: ReflectionController,
    synthesizer: ResponseSynthesizer,
    telemetry: Arc<dyn TelemetrySink>,
}

impl QueryEngine {
    /// Build an engine. The registry is frozen from here on.
    pub fn new(
        registry: CapabilityRegistry,
        provider: Arc<dyn CompletionProvider>,
        config: EngineConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        if !registry.contains(&config.default_capability) {
            tracing::warn!(
                default_capability = %config.default_capability,
                "[Engine] default capability is not registered; unknown capabilities will use the completion fallback"
            );
        }

        let registry = Arc::new(registry);
        let config = Arc::new(config);

        Ok(Self {
            planner: PlanSynthesizer::new(provider.clone(), registry.clone(), config.clone()),
            executor: PlanExecutor::new(registry.clone(), provider.clone(), config.clone()),
            reflection: ReflectionController::new(
                provider.clone(),
                registry.clone(),
                config.clone(),
            ),
            synthesizer: ResponseSynthesizer::new(provider, config.clone()),
            registry,
            config,
            telemetry: Arc::new(NoopSink),
        })
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer `query` in a fresh session.
    pub async fn execute_query(
        &self,
        query: &str,
        expertise: ExpertiseLevel,
        query_id: Option<String>,
    ) -> AppResult<QueryAnswer> {
        let mut session = QuerySession::new(query, expertise);
        if let Some(id) = query_id {
            session = session.with_query_id(id);
        }
        self.execute_session(&mut session).await
    }

    /// Answer the session's query. On return the session holds the executed
    /// plan and the finalized journey, whether the query succeeded or not.
    pub async fn execute_session(&self, session: &mut QuerySession) -> AppResult<QueryAnswer> {
        if session.is_finished() || session.plan.is_some() {
            return Err(AppError::validation(format!(
                "session {} has already been executed",
                session.query_id()
            )));
        }
        if session.query().trim().is_empty() {
            return Err(AppError::validation("query must not be empty"));
        }

        let started = Instant::now();
        let run = session.run_context();
        let query = session.query().to_string();
        let mut journey = JourneyRecorder::new(
            &run.query_id,
            &query,
            run.expertise,
            self.telemetry.clone(),
        );

        tracing::info!(
            query_id = %run.query_id,
            expertise = %run.expertise,
            "[Engine] query started"
        );

        let mut plan = self.planner.synthesize(&query, &run, &mut journey).await;
        journey.set_plan_id(&plan.id);

        let result = self.run_plan(&mut plan, &run, &mut journey).await;

        let answer = match result {
            Ok((synthesis, retried)) => {
                let succeeded = plan.completed().next().is_some();
                let error = (!succeeded).then(|| "no subtask completed".to_string());
                session.journey = Some(journey.finalize(
                    Some(&plan),
                    succeeded,
                    synthesis.confidence,
                    error,
                ));

                tracing::info!(
                    query_id = %run.query_id,
                    confidence = synthesis.confidence,
                    retried = retried.len(),
                    fallback = synthesis.is_fallback,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[Engine] query finished"
                );

                Ok(QueryAnswer {
                    query_id: run.query_id.clone(),
                    answer: synthesis.answer,
                    sources: synthesis.sources,
                    confidence: synthesis.confidence,
                    plan_id: plan.id.clone(),
                    retried_task_ids: retried,
                    synthesis_fallback: synthesis.is_fallback,
                })
            }
            Err(e) => {
                tracing::error!(
                    query_id = %run.query_id,
                    error = %e,
                    "[Engine] query aborted"
                );
                session.journey = Some(journey.finalize(
                    Some(&plan),
                    false,
                    0.0,
                    Some(e.to_string()),
                ));
                Err(e)
            }
        };

        session.plan = Some(plan);
        answer
    }

    async fn run_plan(
        &self,
        plan: &mut ExecutionPlan,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> AppResult<(Synthesis, Vec<String>)> {
        self.executor.execute(plan, run, journey).await?;

        let mut reflection = self.reflection.reflect(plan, run, journey).await;
        ensure_not_cancelled(run)?;

        let mut retried: Vec<String> = Vec::new();
        let mut pass = 0;
        while pass < self.config.max_retry_passes {
            let targets = self.reflection.retry_targets(plan);
            if !self.reflection.should_retry(&reflection, &targets) {
                break;
            }
            tracing::info!(
                query_id = %run.query_id,
                pass = pass + 1,
                targets = ?targets,
                "[Engine] retrying subtasks"
            );
            let ids = self
                .reflection
                .retry(&self.executor, plan, &reflection, &targets, run, journey)
                .await?;
            for id in ids {
                if !retried.contains(&id) {
                    retried.push(id);
                }
            }

            pass += 1;
            if pass < self.config.max_retry_passes {
                reflection = self.reflection.reflect(plan, run, journey).await;
                ensure_not_cancelled(run)?;
            }
        }

        let synthesis = self
            .synthesizer
            .synthesize(plan, &reflection, run, journey)
            .await;
        ensure_not_cancelled(run)?;

        Ok((synthesis, retried))
    }
}

fn ensure_not_cancelled(run: &RunContext) -> AppResult<()> {
    if run.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}
