//! Prompt Builders
//!
//! Text sent to the completion provider at each call site. Every prompt that
//! expects structured output spells out the exact JSON shape the matching
//! parser in `parsing` accepts.

use query_cascade_core::ExpertiseLevel;

use super::registry::CapabilityInfo;
use super::types::{ExecutionPlan, ReflectionResult, SubTask};

pub const PLANNER_SYSTEM: &str = "You are a planning expert for a multi-capability question answering system. \
You decompose a user query into the smallest set of subtasks that fully answers it, \
assign each subtask to exactly one available capability and declare dependencies between subtasks. \
You reply with JSON only.";

pub const REFLECTION_SYSTEM: &str = "You are an expert at evaluating the output of a multi-step \
question answering system. You score results strictly and reply with JSON only.";

pub const SYNTHESIS_SYSTEM: &str = "You are an expert at merging the results of several \
specialized capabilities into one cohesive, well-structured answer.";

pub const FALLBACK_SYSTEM: &str = "You are a helpful assistant completing one step of a larger answer.";

/// Prompt asking for an execution plan over the registered capabilities.
pub fn planning_prompt(
    query: &str,
    expertise: ExpertiseLevel,
    capabilities: &[CapabilityInfo],
) -> String {
    let mut catalog = String::new();
    for cap in capabilities {
        if cap.description.is_empty() {
            catalog.push_str(&format!("- {}\n", cap.name));
        } else {
            catalog.push_str(&format!("- {}: {}\n", cap.name, cap.description));
        }
    }

    format!(
        r#"Analyze the following query and create an execution plan.

## Query
{query}

## User Expertise Level
{expertise}

## Available Capabilities
{catalog}
## Rules
1. Assign every subtask to exactly one capability from the list above, using its exact name.
2. Give each subtask a unique id ("task_1", "task_2", ...).
3. List in "dependencies" the ids of subtasks whose output this subtask needs. Dependencies must not form a cycle.
4. Subtasks without a data dependency on each other must not depend on each other; they run in parallel.
5. Describe input requirements and expected outputs as short key/description pairs.
6. Priority is one of critical, high, medium, low.

## Output Format
Return ONLY a JSON object:
{{
  "plan_summary": "Brief description of the overall approach",
  "subtasks": [
    {{
      "id": "task_1",
      "description": "What this subtask accomplishes",
      "capability": "one of the capability names above",
      "input_requirements": {{"key": "description of needed input"}},
      "expected_output": {{"key": "description of produced output"}},
      "priority": "high",
      "estimated_duration_ms": 1000,
      "dependencies": []
    }}
  ],
  "estimated_total_duration_ms": 5000,
  "complexity_score": 0.7,
  "confidence_prediction": 0.85
}}"#
    )
}

/// Follow-up prompt when the plan response did not parse.
pub fn plan_repair_prompt(query: &str, previous_response: &str, parse_error: &str) -> String {
    format!(
        "Your previous response could not be parsed as a valid plan.\n\n\
         ## Previous Response\n{previous_response}\n\n\
         ## Parse Error\n{parse_error}\n\n\
         Please fix your response and return valid JSON for the plan.\n\
         The original query was: {query}\n\n\
         Return ONLY the corrected JSON, no additional text."
    )
}

/// Prompt asking for a verdict over the current subtask states.
pub fn reflection_prompt(plan: &ExecutionPlan, expertise: ExpertiseLevel) -> String {
    let summary: Vec<serde_json::Value> = plan
        .subtasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "id": t.id,
                "description": t.description,
                "capability": t.capability,
                "status": t.status.to_string(),
                "confidence": t.confidence,
                "has_error": t.error_message.is_some(),
            })
        })
        .collect();
    let summary_json =
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"Analyze the execution results for this query and assess them.

## Original Query
{query}

## User Expertise Level
{expertise}

## Execution Results
{summary_json}

## Evaluate
1. Quality: how well do the results address the query?
2. Completeness: are all aspects of the query covered?
3. Accuracy: how confident are you in the accuracy?
4. Improvements: what specific improvements could be made?
5. Retry: should failed or weak subtasks be run again? If another capability would do better, say so in retry_strategy and name it.

## Output Format
Return ONLY a JSON object, scores between 0 and 1:
{{
  "quality_score": 0.85,
  "completeness_score": 0.9,
  "accuracy_confidence": 0.88,
  "improvement_suggestions": ["specific suggestion"],
  "should_retry": false,
  "retry_strategy": "strategy description if retry is needed"
}}"#,
        query = plan.original_query,
    )
}

/// Prompt asking for the final answer.
pub fn synthesis_prompt(
    query: &str,
    expertise: ExpertiseLevel,
    completed: &[&SubTask],
    reflection: &ReflectionResult,
) -> String {
    let mut results = String::new();
    for task in completed {
        let content = task
            .output
            .as_ref()
            .map(|o| o.content.as_str())
            .unwrap_or("");
        results.push_str(&format!(
            "### {} ({}, confidence {:.2})\n{}\n\n",
            task.description,
            task.capability,
            task.effective_confidence(),
            content
        ));
    }

    format!(
        "Write one answer to the user's query using the results below.\n\n\
         ## Original Query\n{query}\n\n\
         ## Audience\n{expertise}: {hint}\n\n\
         ## Results\n{results}\
         ## Quality Assessment\n\
         - Quality Score: {quality:.2}\n\
         - Completeness Score: {completeness:.2}\n\
         - Accuracy Confidence: {accuracy:.2}\n\n\
         ## Requirements\n\
         1. Answer the query directly.\n\
         2. Integrate the insights from all results rather than listing them.\n\
         3. Match the technical depth to the audience.\n\
         4. Acknowledge limitations or uncertainty where the assessment is weak.",
        hint = expertise.audience_hint(),
        quality = reflection.quality_score,
        completeness = reflection.completeness_score,
        accuracy = reflection.accuracy_confidence,
    )
}

/// Prompt used when the completion provider stands in for a missing capability.
pub fn capability_fallback_prompt(
    task: &SubTask,
    original_query: &str,
    expertise: ExpertiseLevel,
) -> String {
    format!(
        "Help with this specific task.\n\n\
         Task: {}\n\
         User Query Context: {}\n\
         User Expertise Level: {}\n\n\
         Provide a helpful response for this task only.",
        task.description, original_query, expertise
    )
}
