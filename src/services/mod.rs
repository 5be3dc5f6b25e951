//! Services
//!
//! The query pipeline (`planning`) and its observability boundary (`telemetry`).

pub mod planning;
pub mod telemetry;

pub use planning::{QueryEngine, QuerySession};
pub use telemetry::{JourneyRecorder, TelemetrySink};
