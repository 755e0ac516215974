//! Bounded hand-off queue between generators and the delivery engine.
//!
//! Pushing into a full queue suspends the producer,
//! which is what keeps memory bounded when the endpoint can't keep up.
//! The queue closes once all [`QueueSender`] handles are dropped.

use std::num::NonZeroUsize;

use tokio::sync::mpsc;

use crate::datapoint::Batch;

/// Default capacity, counted in slices (not datapoints).
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

pub fn handoff_queue(capacity: NonZeroUsize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (QueueSender(tx), QueueReceiver(rx))
}

#[derive(Debug, Clone)]
pub struct QueueSender(mpsc::Sender<Batch>);

impl QueueSender {
    /// Hand a slice over to the delivery engine,
    /// waiting for capacity if the queue is full.
    pub async fn push(&self, slice: Batch) -> Result<(), QueueClosed> {
        self.0.send(slice).await.map_err(|_| QueueClosed)
    }
}

#[derive(Debug)]
pub struct QueueReceiver(mpsc::Receiver<Batch>);

impl QueueReceiver {
    /// Returns `None` once the queue is empty and all senders are gone.
    pub async fn recv(&mut self) -> Option<Batch> {
        self.0.recv().await
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Batch> {
        self.0.try_recv().ok()
    }
}

/// The receiving side of the hand-off queue was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("hand-off queue closed")
    }
}

impl std::error::Error for QueueClosed {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::yield_now;

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_blocks_producer_until_consumed() {
        let (tx, mut rx) = handoff_queue(NonZeroUsize::MIN);

        tx.push(Vec::new()).await.unwrap();

        let h = tokio::spawn({
            let tx = tx.clone();
            async move { tx.push(Vec::new()).await }
        });

        yield_now().await;
        assert!(!h.is_finished());

        assert!(rx.recv().await.is_some());
        h.await.unwrap().unwrap();
        assert!(rx.try_recv().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn queue_closes_when_all_senders_are_dropped() {
        let (tx, mut rx) = handoff_queue(NonZeroUsize::new(4).unwrap());
        let tx2 = tx.clone();

        tx.push(Vec::new()).await.unwrap();
        drop(tx);
        drop(tx2);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn push_fails_once_receiver_is_gone() {
        let (tx, rx) = handoff_queue(NonZeroUsize::MIN);
        drop(rx);
        assert_eq!(tx.push(Vec::new()).await, Err(QueueClosed));
    }
}
