//! Parse-or-Fallback Boundaries
//!
//! Pure functions turning raw completion text into validated structures.
//! Callers treat any `Err` exactly like a failed completion call and switch
//! to the documented fallback (`fallback_plan`, `ReflectionResult::fallback`).

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::utils::error::{AppError, AppResult};

use super::types::{ExecutionPlan, ReflectionResult, SubTask, TaskPriority};

/// Summary used by the single-task plan.
pub const FALLBACK_PLAN_SUMMARY: &str = "Single-capability processing";

/// Extract the first JSON object from a text that may contain markdown fences.
pub fn extract_json_object(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let after_fence = &text[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim().to_string());
        }
    }
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let after_lang = match after_fence.find('\n') {
            Some(nl) => &after_fence[nl + 1..],
            None => after_fence,
        };
        if let Some(end) = after_lang.find("```") {
            let content = after_lang[..end].trim();
            if content.starts_with('{') {
                return Some(content.to_string());
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default, alias = "summary", alias = "planSummary")]
    plan_summary: String,
    #[serde(alias = "tasks")]
    subtasks: Vec<RawSubTask>,
    #[serde(
        default,
        alias = "estimated_total_time_ms",
        alias = "estimatedTotalDurationMs"
    )]
    estimated_total_duration_ms: Option<f64>,
    #[serde(default, alias = "complexityScore")]
    complexity_score: Option<f64>,
    #[serde(default, alias = "confidencePrediction")]
    confidence_prediction: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSubTask {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "agent_type", alias = "agentType")]
    capability: String,
    #[serde(default, alias = "inputRequirements")]
    input_requirements: serde_json::Value,
    #[serde(default, alias = "expectedOutput")]
    expected_output: serde_json::Value,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "estimated_time_ms", alias = "estimatedDurationMs")]
    estimated_duration_ms: Option<f64>,
    #[serde(default)]
    dependencies: Vec<serde_json::Value>,
}

/// Parse a planning response into an `ExecutionPlan`.
///
/// Subtasks without a capability get `default_capability`. Numeric
/// references resolve to `task_<n>`; a dependency on an unknown id makes the
/// plan unsatisfiable. Cycles are left in place for the executor to reject.
pub fn parse_plan_response(
    text: &str,
    query: &str,
    default_capability: &str,
) -> AppResult<ExecutionPlan> {
    let json_str = extract_json_object(text)
        .ok_or_else(|| AppError::plan("No JSON found in plan response"))?;
    let raw: RawPlan = serde_json::from_str(&json_str)
        .map_err(|e| AppError::plan(format!("Failed to parse plan JSON: {e}")))?;

    if raw.subtasks.is_empty() {
        return Err(AppError::plan("Plan has no subtasks"));
    }

    let mut ids = Vec::with_capacity(raw.subtasks.len());
    for (i, sub) in raw.subtasks.iter().enumerate() {
        let id = sub
            .id
            .as_ref()
            .and_then(json_scalar_to_string)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("task_{}", i + 1));
        ids.push(id);
    }
    let id_set: HashSet<&str> = ids.iter().map(String::as_str).collect();
    if id_set.len() != ids.len() {
        return Err(AppError::plan("Plan contains duplicate subtask ids"));
    }

    let mut subtasks = Vec::with_capacity(raw.subtasks.len());
    for (raw_task, id) in raw.subtasks.iter().zip(ids.iter()) {
        if raw_task.description.trim().is_empty() {
            return Err(AppError::plan(format!("Subtask {id} has no description")));
        }

        let capability = if raw_task.capability.trim().is_empty() {
            default_capability.to_string()
        } else {
            raw_task.capability.trim().to_string()
        };

        let mut dependencies: Vec<String> = Vec::new();
        for dep in &raw_task.dependencies {
            match resolve_dependency(dep, &id_set) {
                Some(dep_id) if !dependencies.contains(&dep_id) => dependencies.push(dep_id),
                Some(_) => {}
                None => {
                    return Err(AppError::plan(format!(
                        "Subtask {id} depends on unknown subtask {dep}"
                    )))
                }
            }
        }

        let mut task = SubTask::new(id.clone(), raw_task.description.trim(), capability)
            .with_priority(
                raw_task
                    .priority
                    .as_deref()
                    .map(TaskPriority::from_label)
                    .unwrap_or_default(),
            )
            .with_dependencies(dependencies);
        task.input_requirements = descriptor_map(&raw_task.input_requirements);
        task.expected_output = descriptor_map(&raw_task.expected_output);
        task.estimated_duration_ms = non_negative_ms(raw_task.estimated_duration_ms);
        subtasks.push(task);
    }

    let estimated_total = match raw.estimated_total_duration_ms {
        Some(ms) => non_negative_ms(Some(ms)),
        None => subtasks.iter().map(|t| t.estimated_duration_ms).sum(),
    };

    let summary = if raw.plan_summary.trim().is_empty() {
        format!("{}-subtask plan", subtasks.len())
    } else {
        raw.plan_summary.trim().to_string()
    };

    let mut plan = ExecutionPlan::new(query, summary).with_subtasks(subtasks);
    plan.estimated_total_duration_ms = estimated_total;
    plan.complexity_score = unit_score(raw.complexity_score, 0.5);
    plan.confidence_prediction = unit_score(raw.confidence_prediction, 0.5);
    Ok(plan)
}

/// Single-task plan targeting `default_capability`.
pub fn fallback_plan(query: &str, default_capability: &str) -> ExecutionPlan {
    let mut task = SubTask::new(
        "task_1",
        format!("Answer the query using {}", default_capability),
        default_capability,
    )
    .with_priority(TaskPriority::High);
    task.input_requirements
        .insert("query".to_string(), query.to_string());
    task.expected_output
        .insert("answer".to_string(), "text response".to_string());
    task.estimated_duration_ms = 2000;

    let mut plan = ExecutionPlan::new(query, FALLBACK_PLAN_SUMMARY).with_subtasks(vec![task]);
    plan.estimated_total_duration_ms = 2000;
    plan.complexity_score = 0.3;
    plan.confidence_prediction = 0.7;
    plan.is_fallback = true;
    plan
}

fn json_scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn resolve_dependency(value: &serde_json::Value, ids: &HashSet<&str>) -> Option<String> {
    let raw = json_scalar_to_string(value)?;
    if ids.contains(raw.as_str()) {
        return Some(raw);
    }
    let numeric = raw.parse::<u64>().ok()?;
    let candidate = format!("task_{}", numeric);
    ids.contains(candidate.as_str()).then_some(candidate)
}

fn descriptor_map(value: &serde_json::Value) -> BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect(),
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            BTreeMap::from([("description".to_string(), s.clone())])
        }
        _ => BTreeMap::new(),
    }
}

fn non_negative_ms(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.round() as u64,
        _ => 0,
    }
}

fn unit_score(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => default,
    }
}

// ============================================================================
// Reflection
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawReflection {
    #[serde(alias = "qualityScore")]
    quality_score: f64,
    #[serde(alias = "completenessScore")]
    completeness_score: f64,
    #[serde(alias = "accuracyConfidence")]
    accuracy_confidence: f64,
    #[serde(default, alias = "improvementSuggestions")]
    improvement_suggestions: Vec<String>,
    #[serde(default, alias = "shouldRetry")]
    should_retry: bool,
    #[serde(default, alias = "retryStrategy")]
    retry_strategy: Option<String>,
}

/// Parse a reflection response. All three scores are required.
pub fn parse_reflection_response(text: &str) -> AppResult<ReflectionResult> {
    let json_str = extract_json_object(text)
        .ok_or_else(|| AppError::validation("No JSON found in reflection response"))?;
    let raw: RawReflection = serde_json::from_str(&json_str)
        .map_err(|e| AppError::validation(format!("Failed to parse reflection JSON: {e}")))?;

    for (name, score) in [
        ("quality_score", raw.quality_score),
        ("completeness_score", raw.completeness_score),
        ("accuracy_confidence", raw.accuracy_confidence),
    ] {
        if !score.is_finite() {
            return Err(AppError::validation(format!("{name} is not a number")));
        }
    }

    Ok(ReflectionResult {
        quality_score: raw.quality_score.clamp(0.0, 1.0),
        completeness_score: raw.completeness_score.clamp(0.0, 1.0),
        accuracy_confidence: raw.accuracy_confidence.clamp(0.0, 1.0),
        improvement_suggestions: raw.improvement_suggestions,
        should_retry: raw.should_retry,
        retry_strategy: raw
            .retry_strategy
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        is_fallback: false,
    })
}
