//! Telemetry Sinks
//!
//! `TelemetrySink::record` is synchronous and infallible so a slow or broken
//! sink can never delay or fail a query. `ChannelSink` forwards events over a
//! bounded channel to a background task that batches them into a
//! [`TelemetryStore`]; when the channel is full the event is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;
use crate::utils::error::{AppError, AppResult};

use super::stats::TelemetryStats;
use super::types::{DecisionRecord, InteractionRecord, QueryJourney, TelemetryEvent};

/// Receiver of decision, interaction and journey events.
pub trait TelemetrySink: Send + Sync {
    /// Must return immediately; implementations drop events they cannot take.
    fn record(&self, event: TelemetryEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Keeps every event in memory. Useful for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Decision(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn interactions(&self) -> Vec<InteractionRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Interaction(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn journeys(&self) -> Vec<QueryJourney> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Journey(j) => Some(j),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats::from_events(&self.events())
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Durable destination for batched telemetry (database, log shipper, ...).
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn persist(&self, batch: Vec<TelemetryEvent>) -> AppResult<()>;
}

/// Message type for the sink channel
#[derive(Debug)]
enum SinkMessage {
    Event(TelemetryEvent),
    Flush,
    Shutdown,
}

/// Channel-backed sink with a batching background task.
pub struct ChannelSink {
    sender: mpsc::Sender<SinkMessage>,
    dropped: AtomicU64,
    enabled: bool,
}

impl ChannelSink {
    /// Start the background task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn TelemetryStore>, config: TelemetryConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel::<SinkMessage>(config.channel_capacity.max(1));
        let enabled = config.enabled;
        let handle = tokio::spawn(async move {
            Self::process_messages(receiver, store, config).await;
        });
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
                enabled,
            },
            handle,
        )
    }

    async fn process_messages(
        mut receiver: mpsc::Receiver<SinkMessage>,
        store: Arc<dyn TelemetryStore>,
        config: TelemetryConfig,
    ) {
        let mut buffer: Vec<TelemetryEvent> = Vec::with_capacity(config.buffer_size);
        let mut flush_interval = tokio::time::interval(tokio::time::Duration::from_secs(
            config.flush_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                msg = receiver.recv() => {
                    match msg {
                        Some(SinkMessage::Event(event)) => {
                            buffer.push(event);
                            if buffer.len() >= config.buffer_size {
                                Self::flush_buffer(store.as_ref(), &mut buffer).await;
                            }
                        }
                        Some(SinkMessage::Flush) => {
                            Self::flush_buffer(store.as_ref(), &mut buffer).await;
                        }
                        Some(SinkMessage::Shutdown) | None => {
                            Self::flush_buffer(store.as_ref(), &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = flush_interval.tick() => {
                    if !buffer.is_empty() {
                        Self::flush_buffer(store.as_ref(), &mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush_buffer(store: &dyn TelemetryStore, buffer: &mut Vec<TelemetryEvent>) {
        if buffer.is_empty() {
            return;
        }
        let count = buffer.len();
        match store.persist(std::mem::take(buffer)).await {
            Ok(()) => tracing::debug!("Flushed {} telemetry events", count),
            Err(e) => tracing::error!("Failed to flush {} telemetry events: {}", count, e),
        }
    }

    /// Ask the background task to flush; dropped if the channel is full.
    pub fn flush(&self) {
        let _ = self.sender.try_send(SinkMessage::Flush);
    }

    /// Flush remaining events and stop the background task.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.sender
            .send(SinkMessage::Shutdown)
            .await
            .map_err(|_| AppError::internal("telemetry task already stopped"))
    }

    /// Events discarded because the channel was full or closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&self, event: TelemetryEvent) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.sender.try_send(SinkMessage::Event(event)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropping telemetry event: {}", e);
        }
    }
}
