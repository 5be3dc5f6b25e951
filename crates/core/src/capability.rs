//! Capability Contract
//!
//! Every handler the engine can dispatch a subtask to (document search, code
//! analysis, image analysis, or an ad-hoc wrapper around a completion model)
//! implements [`Capability`]. Failures come back as [`CapabilityError`]
//! values; the engine never relies on a panic crossing this boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::CapabilityContext;

// ============================================================================
// Response Types
// ============================================================================

/// Where a piece of supporting evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Document,
    Image,
    Code,
    Graph,
    Web,
    /// Produced by the completion model standing in for a missing capability.
    CompletionFallback,
    Other,
}

/// One piece of evidence backing a capability's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub content: String,
    pub relevance_score: f64,
    pub source_label: String,
    #[serde(default)]
    pub kind: SourceKind,
    /// Handler-specific attributes (page number, file path, image id, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SourceRef {
    pub fn new(
        kind: SourceKind,
        source_label: impl Into<String>,
        content: impl Into<String>,
        relevance_score: f64,
    ) -> Self {
        Self {
            content: content.into(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
            source_label: source_label.into(),
            kind,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Successful output of `Capability::process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Handler's own confidence in `content`, 0.0 to 1.0.
    pub confidence: f64,
    pub processing_time_ms: f64,
}

impl CapabilityResponse {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            processing_time_ms: 0.0,
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceRef>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_processing_time(mut self, ms: f64) -> Self {
        self.processing_time_ms = ms;
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a capability handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("{capability} failed: {message}")]
    Failed { capability: String, message: String },

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("invalid input for {capability}: {message}")]
    InvalidInput { capability: String, message: String },
}

impl CapabilityError {
    pub fn failed(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            capability: capability.into(),
            message: message.into(),
        }
    }
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

// ============================================================================
// Trait
// ============================================================================

/// A named handler that can perform one kind of subtask.
///
/// Implementations must be safe for concurrent `process` calls; the engine
/// bounds concurrency per capability but may run several calls at once.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry key, e.g. `"document_search"`.
    fn name(&self) -> &str;

    /// One-line description shown to the planner.
    fn description(&self) -> &str {
        ""
    }

    async fn process(&self, ctx: &CapabilityContext) -> CapabilityResult<CapabilityResponse>;
}
