//! Telemetry
//!
//! Observability boundary of the engine: decision and interaction events
//! streamed while a query runs, plus one `QueryJourney` per query. Sinks are
//! fire-and-forget and never influence query results.

pub mod journey;
pub mod sink;
pub mod stats;
pub mod types;

pub use journey::JourneyRecorder;
pub use sink::{ChannelSink, MemorySink, NoopSink, TelemetrySink, TelemetryStore};
pub use stats::{CapabilityStats, TelemetryStats};
pub use types::{
    DecisionRecord, DecisionType, InteractionKind, InteractionRecord, QueryJourney,
    SubTaskOutcome, TelemetryEvent,
};
