use std::collections::VecDeque;

use crate::datapoint::Batch;

/// Re-batches incoming slices into batches of at most `max_batch_size` points.
///
/// Full batches are sealed and wait in a bounded buffer until a dispatch slot frees up;
/// when that buffer overflows the oldest sealed batch is dropped.
/// The batch currently being filled ("open") is handed out as-is
/// whenever a slot is free and no sealed batch is waiting.
#[derive(Debug)]
pub(super) struct BatchAssembler {
    max_batch_size: usize,
    max_buffered: usize,
    sealed: VecDeque<Batch>,
    open: Batch,
}

/// Result of pushing a slice into the assembler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct PushOutcome {
    pub(super) dropped_batches: usize,
    pub(super) dropped_datapoints: usize,
}

impl BatchAssembler {
    pub(super) fn new(max_batch_size: usize, max_buffered: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            max_buffered: max_buffered.max(1),
            sealed: VecDeque::new(),
            open: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, slice: Batch) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        let mut points = slice.into_iter();

        loop {
            let room = self.max_batch_size - self.open.len();
            self.open.extend(points.by_ref().take(room));
            if self.open.len() < self.max_batch_size {
                return outcome;
            }

            self.sealed.push_back(std::mem::take(&mut self.open));
            if self.sealed.len() > self.max_buffered
                && let Some(dropped) = self.sealed.pop_front()
            {
                outcome.dropped_batches += 1;
                outcome.dropped_datapoints += dropped.len();
            }
        }
    }

    /// At least one full batch is waiting for a dispatch slot.
    pub(super) fn has_sealed(&self) -> bool {
        !self.sealed.is_empty()
    }

    /// Next batch to dispatch: oldest sealed batch first, then the open one.
    pub(super) fn next_batch(&mut self) -> Option<Batch> {
        if let Some(batch) = self.sealed.pop_front() {
            return Some(batch);
        }
        if self.open.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.open))
    }

    pub(super) fn is_empty(&self) -> bool {
        self.sealed.is_empty() && self.open.is_empty()
    }

    pub(super) fn buffered_batches(&self) -> usize {
        self.sealed.len()
    }
}
