//! Query Cascade LLM
//!
//! The completion-provider boundary used for planning, reflection, answer
//! synthesis and the last-resort capability fallback:
//! - `CompletionProvider` trait
//! - OpenAI and OpenAI-compatible chat-completions provider
//! - HTTP client factory

pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::CompletionProvider;
pub use types::*;
