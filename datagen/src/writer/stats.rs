use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of batches currently being sent.
///
/// Incremented when a batch is dispatched and decremented exactly once
/// when that batch reaches a terminal outcome (delivered or given up on).
#[derive(Debug, Default)]
pub struct InFlightCounter(AtomicUsize);

impl InFlightCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(super) fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the count after the decrement.
    pub(super) fn decrement(&self) -> usize {
        self.0.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

#[derive(Debug, Default)]
pub(super) struct DeliveryStats {
    batches_sent: AtomicU64,
    datapoints_sent: AtomicU64,
    batches_failed: AtomicU64,
    datapoints_failed: AtomicU64,
    retries: AtomicU64,
    batches_dropped: AtomicU64,
    datapoints_dropped: AtomicU64,
}

impl DeliveryStats {
    pub(super) fn record_sent(&self, datapoints: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.datapoints_sent
            .fetch_add(datapoints as u64, Ordering::Relaxed);
    }

    pub(super) fn record_failed(&self, datapoints: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.datapoints_failed
            .fetch_add(datapoints as u64, Ordering::Relaxed);
    }

    pub(super) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dropped(&self, batches: usize, datapoints: usize) {
        self.batches_dropped
            .fetch_add(batches as u64, Ordering::Relaxed);
        self.datapoints_dropped
            .fetch_add(datapoints as u64, Ordering::Relaxed);
    }

    pub(super) fn report(&self) -> DeliveryReport {
        DeliveryReport {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            datapoints_sent: self.datapoints_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            datapoints_failed: self.datapoints_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            datapoints_dropped: self.datapoints_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the delivery counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batches_sent: u64,
    pub datapoints_sent: u64,
    /// Batches given up on after a non-transient error or a failed retry.
    pub batches_failed: u64,
    pub datapoints_failed: u64,
    pub retries: u64,
    /// Batches dropped because the write buffer overflowed.
    pub batches_dropped: u64,
    pub datapoints_dropped: u64,
}
