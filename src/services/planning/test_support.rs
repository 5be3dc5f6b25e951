//! Test doubles for planning unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use query_cascade_core::{
    Capability, CapabilityContext, CapabilityError, CapabilityResponse, CapabilityResult,
    SourceKind, SourceRef,
};
use query_cascade_llm::{
    CompletionProvider, LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message,
};

use crate::config::EngineConfig;
use crate::services::planning::registry::CapabilityRegistry;
use crate::services::planning::session::RunContext;
use crate::services::telemetry::{JourneyRecorder, MemorySink};

/// Completion provider that replays queued responses in order.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResult<LlmResponse>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
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

    pub fn text(text: &str) -> LlmResult<LlmResponse> {
        Ok(LlmResponse::from_text(text, "scripted"))
    }

    pub fn error(message: &str) -> LlmResult<LlmResponse> {
        Err(LlmError::ServerError {
            message: message.to_string(),
            status: Some(500),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
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
            .unwrap_or_else(|| {
                Err(LlmError::Other {
                    message: "no scripted response left".to_string(),
                })
            })
    }
}

/// Capability whose per-task results can be scripted.
pub struct TestCapability {
    name: String,
    default_confidence: f64,
    scripted: Mutex<HashMap<String, VecDeque<Result<f64, String>>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CapabilityContext>>,
}

impl TestCapability {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_confidence: 0.8,
            scripted: Mutex::new(HashMap::new()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue results for `task_id`: `Ok(confidence)` or `Err(message)`.
    pub fn script(self, task_id: &str, results: Vec<Result<f64, String>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(task_id.to_string(), results.into());
        self
    }

    pub fn calls(&self) -> Vec<CapabilityContext> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_task_ids(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.metadata.task_id.clone())
            .collect()
    }
}

#[async_trait]
impl Capability for TestCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test capability"
    }

    async fn process(&self, ctx: &CapabilityContext) -> CapabilityResult<CapabilityResponse> {
        self.calls.lock().unwrap().push(ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let task_id = ctx.task_id().unwrap_or("adhoc").to_string();
        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&task_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(self.default_confidence));

        match next {
            Ok(confidence) => Ok(CapabilityResponse::new(
                format!("{} result for {}", self.name, task_id),
                confidence,
            )
            .with_sources(vec![SourceRef::new(
                SourceKind::Document,
                format!("{}:{}", self.name, task_id),
                "evidence",
                0.9,
            )])),
            Err(message) => Err(CapabilityError::failed(&self.name, message)),
        }
    }
}

pub fn run_context() -> RunContext {
    RunContext::new("q-test", query_cascade_core::ExpertiseLevel::General)
}

pub fn recorder() -> (JourneyRecorder, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let recorder = JourneyRecorder::new(
        "q-test",
        "test query",
        query_cascade_core::ExpertiseLevel::General,
        sink.clone(),
    );
    (recorder, sink)
}

pub fn registry_with(caps: Vec<Arc<TestCapability>>) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for cap in caps {
        registry.register(cap);
    }
    Arc::new(registry)
}

pub fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        capability_timeout_ms: 2_000,
        completion_timeout_ms: 2_000,
        ..Default::default()
    })
}
