//! Shared mocks for the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use query_cascade::{
    Capability, CapabilityContext, CapabilityError, CapabilityResponse, CapabilityResult,
    CompletionProvider, LlmError, SourceKind, SourceRef,
};
use query_cascade_llm::{LlmRequestOptions, LlmResponse, LlmResult, Message};

/// Completion provider replaying a queue of canned answers.
pub struct MockProvider {
    responses: Mutex<VecDeque<LlmResult<LlmResponse>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new(responses: Vec<LlmResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

pub fn text(body: &str) -> LlmResult<LlmResponse> {
    Ok(LlmResponse::from_text(body, "mock-model"))
}

pub fn failure(message: &str) -> LlmResult<LlmResponse> {
    Err(LlmError::ServerError {
        message: message.to_string(),
        status: Some(503),
    })
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| failure("queue exhausted"))
    }
}

/// Global sequence used to order dispatch start/end events across tasks.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

/// Capability with per-task scripted results and recorded spans.
pub struct MockCapability {
    name: String,
    default_confidence: f64,
    delay: Duration,
    scripts: Mutex<HashMap<String, VecDeque<Result<f64, String>>>>,
    spans: Mutex<HashMap<String, Vec<Span>>>,
    contexts: Mutex<Vec<CapabilityContext>>,
}

impl MockCapability {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_confidence: 0.8,
            delay: Duration::from_millis(2),
            scripts: Mutex::new(HashMap::new()),
            spans: Mutex::new(HashMap::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, task_id: &str, results: Vec<Result<f64, String>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), results.into());
        self
    }

    pub fn spans(&self, task_id: &str) -> Vec<Span> {
        self.spans
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dispatch_count(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<CapabilityContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "integration test capability"
    }

    async fn process(&self, ctx: &CapabilityContext) -> CapabilityResult<CapabilityResponse> {
        let start = SEQUENCE.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(ctx.clone());
        let task_id = ctx.task_id().unwrap_or("adhoc").to_string();

        tokio::time::sleep(self.delay).await;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&task_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(self.default_confidence));

        let end = SEQUENCE.fetch_add(1, Ordering::SeqCst);
        self.spans
            .lock()
            .unwrap()
            .entry(task_id.clone())
            .or_default()
            .push(Span { start, end });

        match next {
            Ok(confidence) => Ok(CapabilityResponse::new(
                format!("{} findings for {}", self.name, task_id),
                confidence,
            )
            .with_sources(vec![SourceRef::new(
                SourceKind::Document,
                format!("{}:{}", self.name, task_id),
                format!("evidence for {}", task_id),
                0.9,
            )])),
            Err(message) => Err(CapabilityError::failed(&self.name, message)),
        }
    }
}

/// JSON plan text: `(id, capability, deps)` per subtask.
pub fn plan_json(tasks: &[(&str, &str, &[&str])]) -> String {
    let subtasks: Vec<serde_json::Value> = tasks
        .iter()
        .map(|(id, capability, deps)| {
            serde_json::json!({
                "id": id,
                "description": format!("work on {}", id),
                "capability": capability,
                "dependencies": deps,
                "priority": "high",
                "estimated_duration_ms": 1000
            })
        })
        .collect();
    serde_json::json!({
        "plan_summary": "integration plan",
        "subtasks": subtasks,
        "complexity_score": 0.5,
        "confidence_prediction": 0.8
    })
    .to_string()
}

pub fn reflection_json(accuracy: f64, should_retry: bool, strategy: Option<&str>) -> String {
    serde_json::json!({
        "quality_score": 0.8,
        "completeness_score": 0.8,
        "accuracy_confidence": accuracy,
        "improvement_suggestions": ["none"],
        "should_retry": should_retry,
        "retry_strategy": strategy
    })
    .to_string()
}
