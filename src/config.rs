//! Engine Configuration
//!
//! `EngineConfig` loads from TOML (file or string) with serde defaults for
//! every field, then takes `QUERY_CASCADE_*` environment overrides.
//!
//! ```toml
//! default_capability = "document_search"
//! max_retry_passes = 2
//! capability_timeout_ms = 10000
//!
//! [capability_limits]
//! code_analysis = 1
//!
//! [telemetry]
//! buffer_size = 50
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Prefix for environment overrides, e.g. `QUERY_CASCADE_MAX_RETRY_PASSES=2`.
pub const ENV_PREFIX: &str = "QUERY_CASCADE_";

/// Tuning knobs for planning, execution, retry and synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capability used for the single-task fallback plan and for unregistered names
    #[serde(default = "default_capability")]
    pub default_capability: String,
    /// Completed subtasks below this confidence are eligible for retry
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    /// Upper bound on retry passes per query (0 disables retry)
    #[serde(default = "default_max_retry_passes")]
    pub max_retry_passes: u32,
    /// Timeout applied to each capability dispatch
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    /// Timeout applied to each planning, reflection or synthesis completion
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
    /// Concurrent dispatches allowed per capability unless overridden below
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_per_capability: usize,
    /// Per-capability in-flight overrides
    #[serde(default)]
    pub capability_limits: HashMap<String, usize>,
    /// Budget for one upstream output forwarded to a dependent subtask
    #[serde(default = "default_max_dependency_output_chars")]
    pub max_dependency_output_chars: usize,
    /// Budget for all upstream outputs forwarded to one subtask
    #[serde(default = "default_max_total_dependency_chars")]
    pub max_total_dependency_chars: usize,
    /// Length of the raw-content answer used when synthesis is unavailable
    #[serde(default = "default_fallback_answer_chars")]
    pub fallback_answer_chars: usize,
    /// Extra completion calls asking the model to repair a malformed plan
    #[serde(default)]
    pub plan_repair_attempts: u32,
    #[serde(default = "default_planning_temperature")]
    pub planning_temperature: f32,
    #[serde(default)]
    pub reflection_temperature: f32,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Batching behaviour of the channel-backed telemetry sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Channel capacity; events beyond it are dropped, never awaited
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Buffered events before an automatic flush
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Flush interval in seconds
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_capability() -> String {
    "document_search".to_string()
}

fn default_low_confidence_threshold() -> f64 {
    0.6
}

fn default_max_retry_passes() -> u32 {
    1
}

fn default_capability_timeout_ms() -> u64 {
    30_000
}

fn default_completion_timeout_ms() -> u64 {
    60_000
}

fn default_max_in_flight() -> usize {
    2
}

fn default_max_dependency_output_chars() -> usize {
    4000
}

fn default_max_total_dependency_chars() -> usize {
    16000
}

fn default_fallback_answer_chars() -> usize {
    500
}

fn default_planning_temperature() -> f32 {
    0.3
}

fn default_synthesis_temperature() -> f32 {
    0.1
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_capability: default_capability(),
            low_confidence_threshold: default_low_confidence_threshold(),
            max_retry_passes: default_max_retry_passes(),
            capability_timeout_ms: default_capability_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            max_in_flight_per_capability: default_max_in_flight(),
            capability_limits: HashMap::new(),
            max_dependency_output_chars: default_max_dependency_output_chars(),
            max_total_dependency_chars: default_max_total_dependency_chars(),
            fallback_answer_chars: default_fallback_answer_chars(),
            plan_repair_attempts: 0,
            planning_temperature: default_planning_temperature(),
            reflection_temperature: 0.0,
            synthesis_temperature: default_synthesis_temperature(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            buffer_size: default_buffer_size(),
            flush_interval_secs: default_flush_interval_secs(),
            enabled: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: EngineConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(path = %path.display(), "[EngineConfig] loaded");
        Ok(config)
    }

    /// Apply `QUERY_CASCADE_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> AppResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (keys include [`ENV_PREFIX`]).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("DEFAULT_CAPABILITY") {
            self.default_capability = v;
        }
        if let Some(v) = get("LOW_CONFIDENCE_THRESHOLD") {
            self.low_confidence_threshold = parse_override("LOW_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("MAX_RETRY_PASSES") {
            self.max_retry_passes = parse_override("MAX_RETRY_PASSES", &v)?;
        }
        if let Some(v) = get("CAPABILITY_TIMEOUT_MS") {
            self.capability_timeout_ms = parse_override("CAPABILITY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("COMPLETION_TIMEOUT_MS") {
            self.completion_timeout_ms = parse_override("COMPLETION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("MAX_IN_FLIGHT_PER_CAPABILITY") {
            self.max_in_flight_per_capability =
                parse_override("MAX_IN_FLIGHT_PER_CAPABILITY", &v)?;
        }
        if let Some(v) = get("PLAN_REPAIR_ATTEMPTS") {
            self.plan_repair_attempts = parse_override("PLAN_REPAIR_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TELEMETRY_ENABLED") {
            self.telemetry.enabled = parse_override("TELEMETRY_ENABLED", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.default_capability.trim().is_empty() {
            return Err(AppError::config("default_capability must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(AppError::config(format!(
                "low_confidence_threshold must be within [0, 1], got {}",
                self.low_confidence_threshold
            )));
        }
        if self.capability_timeout_ms == 0 || self.completion_timeout_ms == 0 {
            return Err(AppError::config("timeouts must be greater than zero"));
        }
        if self.max_in_flight_per_capability == 0 {
            return Err(AppError::config(
                "max_in_flight_per_capability must be at least 1",
            ));
        }
        if let Some((name, _)) = self.capability_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(AppError::config(format!(
                "capability_limits.{} must be at least 1",
                name
            )));
        }
        Ok(())
    }

    /// In-flight bound for one capability.
    pub fn in_flight_limit(&self, capability: &str) -> usize {
        self.capability_limits
            .get(capability)
            .copied()
            .unwrap_or(self.max_in_flight_per_capability)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        AppError::config(format!("{}{}='{}': {}", ENV_PREFIX, name, value, e))
    })
}
