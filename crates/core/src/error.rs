//! Core Error Types
//!
//! Errors raised while building capability inputs. Capability execution
//! failures have their own type, [`crate::CapabilityError`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A context or response field failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Expertise label outside general / student / expert and their aliases
    #[error("Unknown expertise level '{0}' (expected general, student or expert)")]
    UnknownExpertise(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
