use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use rama::error::BoxError;

use crate::datapoint::{Batch, Datapoint};

use super::DatapointSink;

/// In-memory sink counting every delivered batch.
///
/// Used for dry runs (measure generation without a network endpoint)
/// and as the recording sink in tests. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    shared: Arc<MemorySinkShared>,
}

#[derive(Debug, Default)]
struct MemorySinkShared {
    batches: AtomicU64,
    datapoints: AtomicU64,
    /// Only present for recording sinks.
    recorded: Option<Mutex<Vec<Batch>>>,
}

impl MemorySink {
    /// A sink which keeps all received batches.
    pub fn recording() -> Self {
        Self {
            shared: Arc::new(MemorySinkShared {
                recorded: Some(Mutex::default()),
                ..Default::default()
            }),
        }
    }

    /// A sink which only counts batches and datapoints,
    /// its memory use stays constant no matter how long it runs.
    pub fn discarding() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> u64 {
        self.shared.batches.load(Ordering::Acquire)
    }

    pub fn datapoint_count(&self) -> u64 {
        self.shared.datapoints.load(Ordering::Acquire)
    }

    /// Sizes of the received batches in arrival order,
    /// empty for [`Self::discarding`] sinks.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.shared
            .recorded
            .as_ref()
            .map(|recorded| recorded.lock().iter().map(Vec::len).collect())
            .unwrap_or_default()
    }

    /// All received datapoints, empty for [`Self::discarding`] sinks.
    pub fn datapoints(&self) -> Vec<Datapoint> {
        self.shared
            .recorded
            .as_ref()
            .map(|recorded| recorded.lock().iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl DatapointSink for MemorySink {
    async fn send(&self, batch: &[Datapoint]) -> Result<(), BoxError> {
        if let Some(recorded) = &self.shared.recorded {
            recorded.lock().push(batch.to_vec());
        }
        self.shared
            .datapoints
            .fetch_add(batch.len() as u64, Ordering::AcqRel);
        self.shared.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::{MetricKind, Value};

    fn batch(n: usize) -> Batch {
        (0..n)
            .map(|i| Datapoint::new("m".into(), Default::default(), i as i64, MetricKind::Gauge))
            .collect()
    }

    #[tokio::test]
    async fn discarding_sink_only_counts() {
        let sink = MemorySink::discarding();
        sink.send(&batch(3)).await.unwrap();
        sink.clone().send(&batch(2)).await.unwrap();

        assert_eq!(sink.batch_count(), 2);
        assert_eq!(sink.datapoint_count(), 5);
        assert!(sink.batch_sizes().is_empty());
        assert!(sink.datapoints().is_empty());
    }

    #[tokio::test]
    async fn discarding_sink_keeps_no_per_batch_state() {
        let sink = MemorySink::discarding();
        let one = batch(1);
        for _ in 0..10_000 {
            sink.send(&one).await.unwrap();
        }

        assert!(sink.shared.recorded.is_none());
        assert_eq!(sink.batch_count(), 10_000);
        assert_eq!(sink.datapoint_count(), 10_000);
    }

    #[tokio::test]
    async fn recording_sink_keeps_datapoints() {
        let sink = MemorySink::recording();
        sink.send(&batch(2)).await.unwrap();
        sink.send(&batch(1)).await.unwrap();

        assert_eq!(sink.batch_count(), 2);
        assert_eq!(sink.batch_sizes(), vec![2, 1]);
        let values: Vec<_> = sink.datapoints().into_iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![Value::Int(0), Value::Int(1), Value::Int(0)]);
    }
}
