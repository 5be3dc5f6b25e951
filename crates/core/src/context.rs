//! Capability Context
//!
//! The input handed to every capability invocation: the text to act on, the
//! caller's expertise hint and typed metadata describing where the call sits
//! inside an execution plan. Open-ended data goes in `ContextMetadata::extra`
//! instead of untyped maps at the top level.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// How technical the final answer should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertiseLevel {
    #[default]
    General,
    Student,
    Expert,
}

impl ExpertiseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertiseLevel::General => "general",
            ExpertiseLevel::Student => "student",
            ExpertiseLevel::Expert => "expert",
        }
    }

    /// Writing guidance appended to synthesis prompts.
    pub fn audience_hint(&self) -> &'static str {
        match self {
            ExpertiseLevel::General => {
                "Use plain language, avoid jargon and explain any technical term you need."
            }
            ExpertiseLevel::Student => {
                "Explain step by step, define key concepts and include a short example where helpful."
            }
            ExpertiseLevel::Expert => {
                "Be precise and dense; assume domain familiarity and skip introductory material."
            }
        }
    }
}

impl fmt::Display for ExpertiseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpertiseLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" | "" => Ok(ExpertiseLevel::General),
            "student" | "beginner" => Ok(ExpertiseLevel::Student),
            "expert" | "advanced" => Ok(ExpertiseLevel::Expert),
            other => Err(CoreError::UnknownExpertise(other.to_string())),
        }
    }
}

/// Output of an already-completed upstream subtask, forwarded to a dependent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyOutput {
    pub task_id: String,
    pub description: String,
    pub content: String,
}

/// Typed metadata attached to a capability invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Subtask being executed, when dispatched from a plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Plan the subtask belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_plan_id: Option<String>,
    /// The user's query, when `CapabilityContext::query` carries a subtask description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    /// Semantic descriptors of what the subtask needs as input.
    #[serde(default)]
    pub input_requirements: BTreeMap<String, String>,
    /// Semantic descriptors of what the subtask is expected to produce.
    #[serde(default)]
    pub expected_output: BTreeMap<String, String>,
    /// Completed upstream outputs, already truncated to the dispatch budget.
    #[serde(default)]
    pub dependency_outputs: Vec<DependencyOutput>,
    /// Capability-specific extension fields.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Input to `Capability::process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityContext {
    pub query_id: String,
    pub query: String,
    pub user_expertise_level: ExpertiseLevel,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

impl CapabilityContext {
    /// Build a context for a standalone (non-plan) invocation.
    pub fn new(
        query_id: impl Into<String>,
        query: impl Into<String>,
        user_expertise_level: ExpertiseLevel,
    ) -> CoreResult<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(CoreError::validation("query must not be empty"));
        }
        Ok(Self {
            query_id: query_id.into(),
            query,
            user_expertise_level,
            metadata: ContextMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: ContextMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn task_id(&self) -> Option<&str> {
        self.metadata.task_id.as_deref()
    }
}
