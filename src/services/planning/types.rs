//! Planning Core Types
//!
//! Data structures shared by the plan synthesizer, the dependency-ordered
//! executor, the reflection controller and the response synthesizer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use query_cascade_core::SourceRef;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Priority & Status
// ============================================================================

/// Advisory priority; execution order is driven by dependencies only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Lenient parse of planner output; unknown labels become `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" => TaskPriority::Critical,
            "high" => TaskPriority::High,
            "low" => TaskPriority::Low,
            _ => TaskPriority::Medium,
        }
    }
}

/// Lifecycle state of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubTaskStatus::Completed | SubTaskStatus::Failed | SubTaskStatus::Skipped
        )
    }

    /// `completed|failed -> in_progress` is the retry edge; `skipped` is final.
    pub fn can_transition_to(&self, next: SubTaskStatus) -> bool {
        use SubTaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Skipped)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Skipped)
                | (Completed, InProgress)
                | (Failed, InProgress)
        )
    }
}

impl std::fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubTaskStatus::Pending => "pending",
            SubTaskStatus::InProgress => "in_progress",
            SubTaskStatus::Completed => "completed",
            SubTaskStatus::Failed => "failed",
            SubTaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ============================================================================
// SubTask
// ============================================================================

/// Output captured from a successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskOutput {
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Capability that actually produced the content.
    pub produced_by: String,
    /// True when the completion provider stood in for a missing capability.
    #[serde(default)]
    pub via_fallback: bool,
}

/// Snapshot of a completed attempt taken before the subtask is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAttempt {
    pub output: SubTaskOutput,
    pub confidence: f64,
    pub execution_time_ms: Option<u64>,
}

/// Unit of delegated work inside an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    pub description: String,
    pub capability: String,
    #[serde(default)]
    pub input_requirements: BTreeMap<String, String>,
    #[serde(default)]
    pub expected_output: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<SubTaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of times this subtask entered `in_progress`.
    #[serde(default)]
    pub attempts: u32,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            capability: capability.into(),
            input_requirements: BTreeMap::new(),
            expected_output: BTreeMap::new(),
            priority: TaskPriority::default(),
            estimated_duration_ms: 0,
            dependencies: Vec::new(),
            status: SubTaskStatus::Pending,
            output: None,
            execution_time_ms: None,
            confidence: None,
            error_message: None,
            attempts: 0,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Move to `next`, rejecting edges outside the subtask state machine.
    pub fn transition(&mut self, next: SubTaskStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::validation(format!(
                "subtask {}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }
        if next == SubTaskStatus::InProgress {
            self.attempts += 1;
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> AppResult<()> {
        self.transition(SubTaskStatus::InProgress)
    }

    pub fn complete(
        &mut self,
        output: SubTaskOutput,
        confidence: f64,
        elapsed_ms: u64,
    ) -> AppResult<()> {
        self.transition(SubTaskStatus::Completed)?;
        self.output = Some(output);
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self.execution_time_ms = Some(elapsed_ms);
        self.error_message = None;
        Ok(())
    }

    /// Only `completed` subtasks carry content. A retry of a completed
    /// subtask that fails is undone with [`SubTask::restore`] instead.
    pub fn fail(&mut self, error: impl Into<String>, elapsed_ms: u64) -> AppResult<()> {
        self.transition(SubTaskStatus::Failed)?;
        self.output = None;
        self.confidence = None;
        self.execution_time_ms = Some(elapsed_ms);
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Output of the current completed attempt, if any.
    pub fn completed_attempt(&self) -> Option<CompletedAttempt> {
        if self.status != SubTaskStatus::Completed {
            return None;
        }
        Some(CompletedAttempt {
            output: self.output.clone()?,
            confidence: self.confidence.unwrap_or(0.0),
            execution_time_ms: self.execution_time_ms,
        })
    }

    /// Return an in-progress retry to the attempt it replaced. The subtask
    /// stays `completed` with its earlier output; `retry_error` is kept in
    /// `error_message`.
    pub fn restore(
        &mut self,
        attempt: CompletedAttempt,
        retry_error: impl Into<String>,
    ) -> AppResult<()> {
        self.transition(SubTaskStatus::Completed)?;
        self.output = Some(attempt.output);
        self.confidence = Some(attempt.confidence);
        self.execution_time_ms = attempt.execution_time_ms;
        self.error_message = Some(retry_error.into());
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> AppResult<()> {
        self.transition(SubTaskStatus::Skipped)?;
        self.output = None;
        self.confidence = None;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Confidence used for aggregation: `completed` subtasks contribute their
    /// own score, everything else contributes 0.
    pub fn effective_confidence(&self) -> f64 {
        match self.status {
            SubTaskStatus::Completed => self.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    /// Failed, or completed below `threshold`.
    pub fn is_retry_eligible(&self, threshold: f64) -> bool {
        match self.status {
            SubTaskStatus::Failed => true,
            SubTaskStatus::Completed => self.confidence.unwrap_or(0.0) < threshold,
            _ => false,
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Status tally for logging and telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A dependency graph of subtasks for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub original_query: String,
    pub summary: String,
    pub subtasks: Vec<SubTask>,
    pub estimated_total_duration_ms: u64,
    pub complexity_score: f64,
    pub confidence_prediction: f64,
    /// True when this is the single-task plan used after a planning failure.
    #[serde(default)]
    pub is_fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(original_query: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_query: original_query.into(),
            summary: summary.into(),
            subtasks: Vec::new(),
            estimated_total_duration_ms: 0,
            complexity_score: 0.5,
            confidence_prediction: 0.5,
            is_fallback: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_subtasks(mut self, subtasks: Vec<SubTask>) -> Self {
        self.subtasks = subtasks;
        self
    }

    pub fn get(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.subtasks.iter_mut().find(|t| t.id == id)
    }

    pub fn completed(&self) -> impl Iterator<Item = &SubTask> {
        self.subtasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Completed)
    }

    pub fn all_terminal(&self) -> bool {
        self.subtasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.subtasks {
            match task.status {
                SubTaskStatus::Pending => counts.pending += 1,
                SubTaskStatus::InProgress => counts.in_progress += 1,
                SubTaskStatus::Completed => counts.completed += 1,
                SubTaskStatus::Failed => counts.failed += 1,
                SubTaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Mean of [`SubTask::effective_confidence`] over every subtask.
    pub fn mean_confidence(&self) -> f64 {
        if self.subtasks.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .subtasks
            .iter()
            .map(SubTask::effective_confidence)
            .sum();
        sum / self.subtasks.len() as f64
    }

    /// Completed subtask with the highest confidence; earlier subtasks win ties.
    pub fn best_completed(&self) -> Option<&SubTask> {
        self.completed().fold(None, |best: Option<&SubTask>, task| match best {
            Some(b) if b.effective_confidence() >= task.effective_confidence() => Some(b),
            _ => Some(task),
        })
    }
}

// ============================================================================
// Reflection & Answer
// ============================================================================

/// Verdict over an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionResult {
    pub quality_score: f64,
    pub completeness_score: f64,
    pub accuracy_confidence: f64,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    pub should_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<String>,
    /// True when the verdict is the fixed fallback rather than a model judgment.
    #[serde(default)]
    pub is_fallback: bool,
}

impl ReflectionResult {
    /// Low-information verdict used when reflection is unavailable.
    pub fn fallback() -> Self {
        Self {
            quality_score: 0.7,
            completeness_score: 0.7,
            accuracy_confidence: 0.6,
            improvement_suggestions: vec!["Unable to perform detailed reflection".to_string()],
            should_retry: false,
            retry_strategy: None,
            is_fallback: true,
        }
    }
}

/// Final result handed to the caller of `QueryEngine::execute_query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnswer {
    pub query_id: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub plan_id: String,
    #[serde(default)]
    pub retried_task_ids: Vec<String>,
    /// True when the answer is the raw-content or apology fallback.
    #[serde(default)]
    pub synthesis_fallback: bool,
}
