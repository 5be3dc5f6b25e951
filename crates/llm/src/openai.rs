//! OpenAI Provider
//!
//! `CompletionProvider` over the OpenAI chat-completions API. Works with any
//! server exposing the same request/response shape when `base_url` points at it.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{missing_api_key_error, parse_http_error, CompletionProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageRole, ProviderConfig,
    ProviderType, StopReason, UsageStats,
};
use crate::http_client::build_http_client;

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    /// Get the API base URL
    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": request_options
                .max_tokens_override
                .unwrap_or(self.config.max_tokens),
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
        });

        let mut openai_messages: Vec<serde_json::Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(sys) = system {
            openai_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }
        for msg in messages {
            openai_messages.push(Self::message_to_openai(msg));
        }
        body["messages"] = serde_json::json!(openai_messages);

        if request_options.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        for (key, value) in &self.config.options {
            body[key.as_str()] = value.clone();
        }

        body
    }

    /// Convert a Message to OpenAI API format
    fn message_to_openai(message: &Message) -> serde_json::Value {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        serde_json::json!({
            "role": role,
            "content": message.content
        })
    }

    fn parse_response(response: &OpenAIResponse) -> LlmResponse {
        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone());

        let stop_reason = choice
            .and_then(|c| c.finish_reason.as_ref())
            .map(|r| StopReason::from(r.as_str()))
            .unwrap_or(StopReason::EndTurn);

        let usage = response
            .usage
            .as_ref()
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        LlmResponse {
            content,
            stop_reason,
            usage,
            model: response.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    fn name(&self) -> &str {
        match self.config.provider {
            ProviderType::OpenAI => "openai",
            ProviderType::OpenAICompatible => "openai_compatible",
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let mut request = self
            .client
            .post(self.base_url())
            .header("Content-Type", "application/json");

        match (&self.config.api_key, self.config.provider) {
            (Some(api_key), _) => {
                request = request.header("Authorization", format!("Bearer {}", api_key));
            }
            (None, ProviderType::OpenAI) => return Err(missing_api_key_error("openai")),
            (None, ProviderType::OpenAICompatible) => {}
        }

        let body = self.build_request_body(&messages, system.as_deref(), &request_options);
        tracing::debug!(
            provider = self.name(),
            model = %self.config.model,
            messages = messages.len(),
            "sending completion request"
        );

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, self.name()));
        }

        let openai_response: OpenAIResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(Self::parse_response(&openai_response))
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.complete(
            vec![Message::user("ping")],
            None,
            LlmRequestOptions {
                max_tokens_override: Some(1),
                ..Default::default()
            },
        )
        .await
        .map(|_| ())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
