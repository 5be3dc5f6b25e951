//! Completion call helper shared by the planner, reflection, synthesis and
//! the capability fallback path.

use std::time::Duration;

use query_cascade_llm::{CompletionProvider, LlmError, LlmRequestOptions, LlmResult, Message};
use tokio_util::sync::CancellationToken;

/// Single-turn completion with a deadline. Blank output counts as a failure.
pub async fn complete_text(
    provider: &dyn CompletionProvider,
    system: &str,
    prompt: String,
    options: LlmRequestOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> LlmResult<String> {
    let call = provider.complete(vec![Message::user(prompt)], Some(system.to_string()), options);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(LlmError::Other {
                message: "cancelled".to_string(),
            });
        }
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => inner?,
            Err(_) => {
                return Err(LlmError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                });
            }
        },
    };

    let text = response.text().trim();
    if text.is_empty() {
        return Err(LlmError::ParseError {
            message: "empty completion".to_string(),
        });
    }
    Ok(text.to_string())
}
