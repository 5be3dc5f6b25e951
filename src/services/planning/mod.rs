//! Planning & Execution
//!
//! The query pipeline:
//! - LLM-powered decomposition of a query into a dependency graph of subtasks
//! - Wavefront execution with per-capability in-flight limits and timeouts
//! - Reflection over the results with one targeted retry pass
//! - Answer synthesis with deterministic fallbacks

pub mod completion;
pub mod engine;
pub mod executor;
pub mod parsing;
pub mod planner;
pub mod prompts;
pub mod reflection;
pub mod registry;
pub mod session;
pub mod synthesizer;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::QueryEngine;
pub use executor::{
    calculate_wavefronts, skip_unfinished, topological_order, validate_plan, PlanExecutor,
    Wavefront, COMPLETION_FALLBACK, COMPLETION_FALLBACK_CONFIDENCE,
};
pub use parsing::{extract_json_object, fallback_plan, parse_plan_response, parse_reflection_response};
pub use planner::PlanSynthesizer;
pub use reflection::{suggests_reassignment, ReflectionController};
pub use registry::{CapabilityInfo, CapabilityRegistry, Resolution};
pub use session::{QuerySession, RunContext};
pub use synthesizer::{
    collect_sources, fallback_answer, final_confidence, ResponseSynthesizer, Synthesis,
    APOLOGY_CONFIDENCE, APOLOGY_MESSAGE,
};
pub use types::{
    CompletedAttempt, ExecutionPlan, QueryAnswer, ReflectionResult, StatusCounts, SubTask, SubTaskOutput,
    SubTaskStatus, TaskPriority,
};
