//! Query Session
//!
//! Per-query state owned by the caller: identity, expertise hint, the
//! cancellation handle and, once the query has run, its plan and journey.
//! One session runs exactly one query.

use query_cascade_core::ExpertiseLevel;
use tokio_util::sync::CancellationToken;

use crate::services::telemetry::QueryJourney;

use super::types::ExecutionPlan;

/// Immutable per-run values handed to every pipeline component.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub query_id: String,
    pub expertise: ExpertiseLevel,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(query_id: impl Into<String>, expertise: ExpertiseLevel) -> Self {
        Self {
            query_id: query_id.into(),
            expertise,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
pub struct QuerySession {
    query_id: String,
    query: String,
    expertise: ExpertiseLevel,
    cancel: CancellationToken,
    pub(crate) plan: Option<ExecutionPlan>,
    pub(crate) journey: Option<QueryJourney>,
}

impl QuerySession {
    pub fn new(query: impl Into<String>, expertise: ExpertiseLevel) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            expertise,
            cancel: CancellationToken::new(),
            plan: None,
            journey: None,
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn expertise(&self) -> ExpertiseLevel {
        self.expertise
    }

    /// Handle the caller can keep (or move to another task) to cancel the query.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The executed plan; `None` until planning finished.
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    /// The finalized journey; `None` until the query finished.
    pub fn journey(&self) -> Option<&QueryJourney> {
        self.journey.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.journey.is_some()
    }

    pub(crate) fn run_context(&self) -> RunContext {
        RunContext {
            query_id: self.query_id.clone(),
            expertise: self.expertise,
            cancel: self.cancel.clone(),
        }
    }
}
