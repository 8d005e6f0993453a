//! Metric events pushed to the external monitoring sink.
//!
//! Emission is fire-and-forget: the orchestrator never waits on, or fails
//! because of, the sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tag set attached to a metric (e.g. `tenant_id`, `agent`, `stage`).
pub type MetricTags = BTreeMap<String, String>;

/// One counter, gauge, or timer observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricEvent {
    Counter {
        name: String,
        value: u64,
        tags: MetricTags,
    },
    Gauge {
        name: String,
        value: f64,
        tags: MetricTags,
    },
    Timer {
        name: String,
        duration_ms: u64,
        tags: MetricTags,
    },
}

impl MetricEvent {
    pub fn counter(name: impl Into<String>, value: u64, tags: MetricTags) -> Self {
        MetricEvent::Counter {
            name: name.into(),
            value,
            tags,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64, tags: MetricTags) -> Self {
        MetricEvent::Gauge {
            name: name.into(),
            value,
            tags,
        }
    }

    pub fn timer(name: impl Into<String>, duration_ms: u64, tags: MetricTags) -> Self {
        MetricEvent::Timer {
            name: name.into(),
            duration_ms,
            tags,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricEvent::Counter { name, .. }
            | MetricEvent::Gauge { name, .. }
            | MetricEvent::Timer { name, .. } => name,
        }
    }

    pub fn tags(&self) -> &MetricTags {
        match self {
            MetricEvent::Counter { tags, .. }
            | MetricEvent::Gauge { tags, .. }
            | MetricEvent::Timer { tags, .. } => tags,
        }
    }
}

/// Build a tag map from `(key, value)` pairs.
pub fn tags<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> MetricTags {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
