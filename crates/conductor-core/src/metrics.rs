//! Ready-made `MetricsSink` implementations.

use std::sync::{Arc, Mutex};

use tracing::info;

use conductor_contracts::metrics::MetricEvent;

use crate::traits::MetricsSink;

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn emit(&self, _event: MetricEvent) {}
}

/// Writes every event as a structured `tracing` record on the `metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, event: MetricEvent) {
        match &event {
            MetricEvent::Counter { name, value, tags } => {
                info!(target: "metrics", metric = %name, value, tags = ?tags, "counter");
            }
            MetricEvent::Gauge { name, value, tags } => {
                info!(target: "metrics", metric = %name, value, tags = ?tags, "gauge");
            }
            MetricEvent::Timer {
                name,
                duration_ms,
                tags,
            } => {
                info!(target: "metrics", metric = %name, duration_ms, tags = ?tags, "timer");
            }
        }
    }
}

/// Keeps every event in memory. Cloning shares the buffer.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetricsSink {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events with the given name.
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }

    /// Sum of all counter values with the given name.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.named(name)
            .iter()
            .map(|e| match e {
                MetricEvent::Counter { value, .. } => *value,
                _ => 0,
            })
            .sum()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn emit(&self, event: MetricEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
