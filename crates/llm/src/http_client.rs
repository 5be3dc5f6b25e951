//! HTTP Client Factory
//!
//! Builds the reqwest client shared by HTTP-backed providers.

use std::time::Duration;

use crate::types::{LlmError, LlmResult, ProviderConfig};

/// Build a `reqwest::Client` from the provider configuration.
///
/// - `proxy_url: Some(..)` -> route every request through that proxy
/// - `proxy_url: None` -> explicitly disable proxies (`no_proxy`), ignoring env vars
pub fn build_http_client(config: &ProviderConfig) -> LlmResult<reqwest::Client> {
    let mut builder =
        reqwest::Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));
    match config.proxy_url.as_deref() {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| LlmError::InvalidRequest {
                message: format!("invalid proxy URL '{}': {}", url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("failed to build HTTP client: {}", e),
    })
}
