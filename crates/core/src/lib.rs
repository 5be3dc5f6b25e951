//! Query Cascade Core
//!
//! Foundational types shared between the engine and capability
//! implementations. No dependency on the engine, the completion providers or
//! any async runtime.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `context` - Invocation context (`CapabilityContext`, `ContextMetadata`, `ExpertiseLevel`)
//! - `capability` - Capability contract (`Capability`, `CapabilityResponse`, `SourceRef`)

pub mod capability;
pub mod context;
pub mod error;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Invocation Context ─────────────────────────────────────────────────
pub use context::{CapabilityContext, ContextMetadata, DependencyOutput, ExpertiseLevel};

// ── Capability Contract ────────────────────────────────────────────────
pub use capability::{
    Capability, CapabilityError, CapabilityResponse, CapabilityResult, SourceKind, SourceRef,
};
