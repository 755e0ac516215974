use std::{collections::HashMap, sync::Arc, time::SystemTime};

/// Label set attached to a [`Datapoint`].
///
/// Shared between all points of one generator,
/// so the (large) label set is only allocated once per worker.
pub type Dimensions = Arc<HashMap<String, String>>;

/// A group of datapoints shipped together in a single send call.
pub type Batch = Vec<Datapoint>;

/// A single synthetic time-series sample.
///
/// Created by a generator at emission time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub metric: Arc<str>,
    pub dimensions: Dimensions,
    pub value: Value,
    pub kind: MetricKind,
    pub timestamp: SystemTime,
}

impl Datapoint {
    pub fn new(
        metric: Arc<str>,
        dimensions: Dimensions,
        value: impl Into<Value>,
        kind: MetricKind,
    ) -> Self {
        Self {
            metric,
            dimensions,
            value: value.into(),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    /// Milliseconds since the unix epoch, saturating at zero for pre-epoch clocks.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
    CumulativeCounter,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::CumulativeCounter => "cumulative_counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
