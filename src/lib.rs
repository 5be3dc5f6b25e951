//! Query Cascade
//!
//! Answers a natural-language query by planning it into a dependency graph of
//! subtasks, dispatching each subtask to a registered capability, reflecting
//! on the results with a targeted retry, and synthesizing one final answer.
//!
//! It includes:
//! - The query engine and its components (`services::planning`)
//! - Decision/interaction telemetry and per-query journeys (`services::telemetry`)
//! - TOML + environment configuration (`config`)
//! - Error types and text helpers (`utils`)
//!
//! Capabilities implement [`Capability`] from `query-cascade-core`; the
//! completion model is any [`CompletionProvider`] from `query-cascade-llm`.

pub mod config;
pub mod services;
pub mod utils;

pub use config::{EngineConfig, TelemetryConfig};
pub use services::planning::{
    CapabilityRegistry, ExecutionPlan, QueryAnswer, QueryEngine, QuerySession, ReflectionResult,
    SubTask, SubTaskStatus,
};
pub use services::telemetry::{
    ChannelSink, MemorySink, NoopSink, QueryJourney, TelemetryEvent, TelemetrySink,
    TelemetryStore,
};
pub use utils::error::{AppError, AppResult};

// Re-export the capability and completion boundaries
pub use query_cascade_core::{
    Capability, CapabilityContext, CapabilityError, CapabilityResponse, CapabilityResult,
    ExpertiseLevel, SourceKind, SourceRef,
};
pub use query_cascade_llm::{CompletionProvider, LlmError, OpenAIProvider, ProviderConfig};
