//! Telemetry Statistics
//!
//! Aggregates a slice of events into per-capability performance figures and
//! decision counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{DecisionType, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStats {
    pub dispatches: usize,
    pub successes: usize,
    pub failures: usize,
    pub retries: usize,
    pub avg_processing_time_ms: f64,
    /// Mean over successful dispatches that reported a confidence.
    pub avg_confidence: f64,
}

impl CapabilityStats {
    pub fn success_rate(&self) -> f64 {
        if self.dispatches == 0 {
            0.0
        } else {
            self.successes as f64 / self.dispatches as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStats {
    pub capabilities: BTreeMap<String, CapabilityStats>,
    pub decision_counts: BTreeMap<DecisionType, usize>,
    pub queries: usize,
    pub successful_queries: usize,
    pub avg_final_confidence: f64,
}

impl TelemetryStats {
    pub fn from_events(events: &[TelemetryEvent]) -> Self {
        let mut stats = TelemetryStats::default();
        let mut time_sums: BTreeMap<String, f64> = BTreeMap::new();
        let mut confidence_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut final_confidence_sum = 0.0;

        for event in events {
            match event {
                TelemetryEvent::Decision(d) => {
                    *stats.decision_counts.entry(d.decision_type).or_default() += 1;
                }
                TelemetryEvent::Interaction(i) => {
                    let entry = stats.capabilities.entry(i.capability.clone()).or_default();
                    entry.dispatches += 1;
                    if i.success {
                        entry.successes += 1;
                    } else {
                        entry.failures += 1;
                    }
                    if i.kind == super::types::InteractionKind::Retry {
                        entry.retries += 1;
                    }
                    *time_sums.entry(i.capability.clone()).or_default() += i.processing_time_ms;
                    if let (true, Some(c)) = (i.success, i.confidence) {
                        let acc = confidence_sums.entry(i.capability.clone()).or_default();
                        acc.0 += c;
                        acc.1 += 1;
                    }
                }
                TelemetryEvent::Journey(j) => {
                    stats.queries += 1;
                    if j.success {
                        stats.successful_queries += 1;
                    }
                    final_confidence_sum += j.final_confidence;
                }
            }
        }

        for (name, entry) in stats.capabilities.iter_mut() {
            if entry.dispatches > 0 {
                entry.avg_processing_time_ms =
                    time_sums.get(name).copied().unwrap_or(0.0) / entry.dispatches as f64;
            }
            if let Some((sum, n)) = confidence_sums.get(name) {
                if *n > 0 {
                    entry.avg_confidence = sum / *n as f64;
                }
            }
        }
        if stats.queries > 0 {
            stats.avg_final_confidence = final_confidence_sum / stats.queries as f64;
        }
        stats
    }
}
