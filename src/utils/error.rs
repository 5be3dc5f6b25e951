//! Error Handling
//!
//! Unified error type for the engine. Capability and completion failures are
//! normally absorbed by the fallbacks in `services::planning`; the variants
//! that reach `QueryEngine::execute_query` callers are plan errors,
//! cancellation, configuration and validation.

use query_cascade_core::{CapabilityError, CoreError};
use query_cascade_llm::LlmError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or unsatisfiable plan (unknown dependency, duplicate id, empty plan)
    #[error("Plan error: {0}")]
    Plan(String),

    /// Dependency cycle; holds the ids that could never become ready
    #[error("Plan error: dependency cycle among subtasks [{}]", .0.join(", "))]
    CyclicPlan(Vec<String>),

    /// Completion provider errors
    #[error("Completion error: {0}")]
    Completion(#[from] LlmError),

    /// Capability handler errors
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Errors bubbled up from the core crate
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query cancelled by the caller
    #[error("Query cancelled")]
    Cancelled,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a plan error
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Fatal plan errors abort the query instead of degrading the answer.
    pub fn is_plan_error(&self) -> bool {
        matches!(self, AppError::Plan(_) | AppError::CyclicPlan(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
