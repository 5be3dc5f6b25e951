//! Response Synthesizer
//!
//! Merges completed subtask outputs and the reflection verdict into the final
//! answer. Without any completed subtask the answer is a fixed apology; when
//! the completion call fails the best subtask's content is returned as is.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use query_cascade_core::SourceRef;
use query_cascade_llm::{CompletionProvider, LlmRequestOptions};

use crate::config::EngineConfig;
use crate::services::telemetry::{DecisionRecord, DecisionType, JourneyRecorder};
use crate::utils::text::truncate_chars;

use super::completion::complete_text;
use super::prompts::{synthesis_prompt, SYNTHESIS_SYSTEM};
use super::session::RunContext;
use super::types::{ExecutionPlan, ReflectionResult, SubTask};

pub const APOLOGY_MESSAGE: &str = "I apologize, but I wasn't able to generate a response to your \
     query at this time. None of the steps needed to answer it completed successfully.";

pub const APOLOGY_CONFIDENCE: f64 = 0.1;

pub const FALLBACK_ANSWER_PREFIX: &str = "Based on the analysis, here's what I found: ";

/// Final answer text with its confidence and supporting sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub confidence: f64,
    pub sources: Vec<SourceRef>,
    /// True for the apology and the raw-content fallback.
    pub is_fallback: bool,
}

/// `(mean subtask confidence + reflection accuracy) / 2`, clamped to [0, 1].
pub fn final_confidence(plan: &ExecutionPlan, reflection: &ReflectionResult) -> f64 {
    ((plan.mean_confidence() + reflection.accuracy_confidence) / 2.0).clamp(0.0, 1.0)
}

/// Sources of every completed subtask, first occurrence wins.
pub fn collect_sources(plan: &ExecutionPlan) -> Vec<SourceRef> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    plan.completed()
        .filter_map(|task| task.output.as_ref())
        .flat_map(|output| output.sources.iter())
        .filter(|source| seen.insert((source.source_label.clone(), source.content.clone())))
        .cloned()
        .collect()
}

/// Content of the highest-confidence completed subtask, truncated.
pub fn fallback_answer(plan: &ExecutionPlan, max_chars: usize) -> Option<String> {
    let content = plan
        .best_completed()
        .and_then(|task| task.output.as_ref())
        .map(|output| output.content.trim())
        .filter(|content| !content.is_empty())?;

    let cut = truncate_chars(content, max_chars);
    let ellipsis = if cut.len() < content.len() { "..." } else { "" };
    Some(format!("{}{}{}", FALLBACK_ANSWER_PREFIX, cut, ellipsis))
}

pub struct ResponseSynthesizer {
    provider: Arc<dyn CompletionProvider>,
    config: Arc<EngineConfig>,
}

impl ResponseSynthesizer {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: Arc<EngineConfig>) -> Self {
        Self { provider, config }
    }

    pub async fn synthesize(
        &self,
        plan: &ExecutionPlan,
        reflection: &ReflectionResult,
        run: &RunContext,
        journey: &mut JourneyRecorder,
    ) -> Synthesis {
        let started = Instant::now();
        let completed: Vec<&SubTask> = plan.completed().collect();

        let synthesis = if completed.is_empty() {
            tracing::warn!(
                query_id = %run.query_id,
                "[Synthesis] no subtask completed, returning apology"
            );
            Synthesis {
                answer: APOLOGY_MESSAGE.to_string(),
                confidence: APOLOGY_CONFIDENCE,
                sources: Vec::new(),
                is_fallback: true,
            }
        } else {
            let confidence = final_confidence(plan, reflection);
            let sources = collect_sources(plan);
            let response = complete_text(
                self.provider.as_ref(),
                SYNTHESIS_SYSTEM,
                synthesis_prompt(&plan.original_query, run.expertise, &completed, reflection),
                LlmRequestOptions::with_temperature(self.config.synthesis_temperature),
                self.config.completion_timeout(),
                &run.cancel,
            )
            .await;

            match response {
                Ok(answer) => Synthesis {
                    answer,
                    confidence,
                    sources,
                    is_fallback: false,
                },
                Err(e) => {
                    tracing::warn!(
                        query_id = %run.query_id,
                        error = %e,
                        "[Synthesis] completion failed, returning best subtask content"
                    );
                    let answer = fallback_answer(plan, self.config.fallback_answer_chars)
                        .unwrap_or_else(|| APOLOGY_MESSAGE.to_string());
                    Synthesis {
                        answer,
                        confidence,
                        sources,
                        is_fallback: true,
                    }
                }
            }
        };

        journey.record_decision(
            DecisionRecord::new(
                &run.query_id,
                "synthesizer",
                DecisionType::ResponseGeneration,
                format!("{} completed subtask(s)", completed.len()),
                truncate_chars(&synthesis.answer, 200),
            )
            .with_reasoning(if synthesis.is_fallback {
                "fallback answer"
            } else {
                "synthesized answer"
            })
            .with_confidence(synthesis.confidence)
            .with_processing_time(started.elapsed().as_secs_f64() * 1000.0)
            .with_metadata("sources", serde_json::json!(synthesis.sources.len())),
        );

        synthesis
    }
}
