//! Batch delivery engine.
//!
//! Drains the hand-off queue, re-batches datapoints up to the max wire batch size,
//! and ships those batches through a [`DatapointSink`] with bounded concurrency.
//! A batch failing with a transient error is retried exactly once,
//! any other failure is logged and the batch is discarded.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rama::{error::BoxError, graceful::ShutdownGuard, telemetry::tracing};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::{
    datapoint::{Batch, Datapoint},
    queue::QueueReceiver,
    sink::DatapointSink,
};

mod assembler;
mod overflow;
mod stats;
mod transient;

pub use self::{
    overflow::{LogOverflow, OverflowSink},
    stats::{DeliveryReport, InFlightCounter},
    transient::{TransientError, is_transient},
};

use self::{
    assembler::{BatchAssembler, PushOutcome},
    stats::DeliveryStats,
};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 8192;
pub const DEFAULT_MAX_REQUESTS: usize = 10;
pub const DEFAULT_MAX_BUFFERED: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Maximum amount of datapoints in a single send call.
    pub max_batch_size: NonZeroUsize,
    /// Maximum amount of concurrent send calls.
    pub max_requests: NonZeroUsize,
    /// Maximum amount of full batches waiting for a free send slot.
    pub max_buffered: NonZeroUsize,
}

pub struct DatapointWriter<S, O = LogOverflow> {
    sink: Arc<S>,
    overflow: O,
    cfg: WriterConfig,
    shared: Arc<WriterShared>,
}

impl<S, O> std::fmt::Debug for DatapointWriter<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatapointWriter")
            .field("cfg", &self.cfg)
            .finish()
    }
}

#[derive(Debug, Default)]
struct WriterShared {
    in_flight: InFlightCounter,
    input_exhausted: AtomicBool,
    stats: DeliveryStats,
    changed: Notify,
}

impl<S: DatapointSink> DatapointWriter<S> {
    pub fn new(sink: S, cfg: WriterConfig) -> Self {
        Self {
            sink: Arc::new(sink),
            overflow: LogOverflow::new(cfg.max_buffered.get()),
            cfg,
            shared: Default::default(),
        }
    }
}

impl<S: DatapointSink, O: OverflowSink> DatapointWriter<S, O> {
    /// Replace the sink notified when a buffered batch is dropped.
    pub fn with_overflow_sink<O2: OverflowSink>(self, overflow: O2) -> DatapointWriter<S, O2> {
        DatapointWriter {
            sink: self.sink,
            overflow,
            cfg: self.cfg,
            shared: self.shared,
        }
    }

    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            shared: self.shared.clone(),
        }
    }

    /// Consume the queue until it is closed and empty,
    /// then idle until the guard is cancelled.
    ///
    /// Sends spawned by this writer are tied to the same guard,
    /// so a graceful shutdown waits for them to finish.
    pub async fn run(self, guard: ShutdownGuard, mut queue: QueueReceiver) {
        let limit = Arc::new(Semaphore::new(self.cfg.max_requests.get()));
        let mut assembler = BatchAssembler::new(
            self.cfg.max_batch_size.get(),
            self.cfg.max_buffered.get(),
        );
        let mut input_open = true;

        loop {
            if !input_open && assembler.is_empty() {
                tracing::debug!("hand-off queue closed and all batches dispatched");
                self.shared.input_exhausted.store(true, Ordering::Release);
                self.shared.changed.notify_waiters();

                guard.cancelled().await;
                tracing::debug!("exit datapoint writer: guard shutdown");
                return;
            }

            tokio::select! {
                biased;

                _ = guard.cancelled() => {
                    tracing::debug!(
                        buffered = assembler.buffered_batches(),
                        "exit datapoint writer early: guard shutdown",
                    );
                    return;
                }

                permit = limit.clone().acquire_owned(), if !assembler.is_empty() => {
                    let Ok(permit) = permit else {
                        tracing::error!("datapoint writer request limit closed unexpectedly");
                        return;
                    };
                    if let Some(batch) = assembler.next_batch() {
                        self.dispatch(&guard, batch, permit);
                    }
                }

                maybe_slice = queue.recv(), if input_open => {
                    let Some(slice) = maybe_slice else {
                        tracing::debug!("hand-off queue closed");
                        input_open = false;
                        continue;
                    };

                    self.accept(&mut assembler, slice);
                    // merge what is already queued before the next dispatch
                    while !assembler.has_sealed()
                        && let Some(slice) = queue.try_recv()
                    {
                        self.accept(&mut assembler, slice);
                    }
                }
            }
        }
    }

    fn accept(&self, assembler: &mut BatchAssembler, slice: Batch) {
        let PushOutcome {
            dropped_batches,
            dropped_datapoints,
        } = assembler.push(slice);

        if dropped_batches > 0 {
            self.shared
                .stats
                .record_dropped(dropped_batches, dropped_datapoints);
            for _ in 0..dropped_batches {
                self.overflow.on_overflow();
            }
        }
    }

    fn dispatch(&self, guard: &ShutdownGuard, batch: Batch, permit: OwnedSemaphorePermit) {
        let in_flight = InFlightGuard::new(self.shared.clone());
        let sink = self.sink.clone();
        let shared = self.shared.clone();

        guard.spawn_task_fn(async move |_guard| {
            let _permit = permit;
            let _in_flight = in_flight;

            match send_with_retry(sink.as_ref(), &batch, &shared.stats).await {
                Ok(()) => {
                    tracing::debug!(length = batch.len(), "number of datapoints sent");
                    shared.stats.record_sent(batch.len());
                }
                Err(err) => {
                    tracing::warn!(
                        length = batch.len(),
                        "error shipping datapoints, batch discarded: {err}"
                    );
                    shared.stats.record_failed(batch.len());
                }
            }
        });
    }
}

/// Send `batch`, retrying once if the first attempt failed with a transient error.
async fn send_with_retry<S: DatapointSink>(
    sink: &S,
    batch: &[Datapoint],
    stats: &DeliveryStats,
) -> Result<(), BoxError> {
    let err = match sink.send(batch).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if !is_transient(err.as_ref()) {
        return Err(err);
    }

    tracing::info!(
        length = batch.len(),
        "retrying datapoint submission after receiving temporary network error: {err}"
    );
    stats.record_retry();
    sink.send(batch).await
}

/// Marks one batch as in flight for as long as it lives.
struct InFlightGuard(Arc<WriterShared>);

impl InFlightGuard {
    fn new(shared: Arc<WriterShared>) -> Self {
        shared.in_flight.increment();
        Self(shared)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.decrement() == 0 {
            self.0.changed.notify_waiters();
        }
    }
}

/// Observer side of a running [`DatapointWriter`].
#[derive(Debug, Clone)]
pub struct WriterHandle {
    shared: Arc<WriterShared>,
}

impl WriterHandle {
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.get()
    }

    pub fn report(&self) -> DeliveryReport {
        self.shared.stats.report()
    }

    /// The queue is closed, every batch got dispatched and no send is in flight.
    pub fn is_drained(&self) -> bool {
        self.shared.input_exhausted.load(Ordering::Acquire) && self.in_flight() == 0
    }

    /// Wait until [`Self::is_drained`].
    ///
    /// Woken by the writer as soon as it drains,
    /// `poll_interval` only bounds how long a missed wake-up can delay us.
    pub async fn wait_drained(&self, poll_interval: Duration) {
        loop {
            let changed = self.shared.changed.notified();
            if self.is_drained() {
                return;
            }

            tokio::select! {
                _ = changed => {}
                _ = tokio::time::sleep(poll_interval) => {
                    tracing::debug!(in_flight = self.in_flight(), "waiting for datapoint writer to drain");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datapoint::MetricKind,
        queue::{QueueSender, handoff_queue},
        sink::MemorySink,
    };
    use parking_lot::Mutex;
    use rama::{error::OpaqueError, graceful::Shutdown};
    use std::{
        collections::VecDeque,
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::oneshot;

    fn slice(n: usize) -> Batch {
        (0..n)
            .map(|i| Datapoint::new("m".into(), Default::default(), i as i64, MetricKind::Counter))
            .collect()
    }

    fn cfg(max_batch_size: usize, max_requests: usize, max_buffered: usize) -> WriterConfig {
        WriterConfig {
            max_batch_size: NonZeroUsize::new(max_batch_size).unwrap(),
            max_requests: NonZeroUsize::new(max_requests).unwrap(),
            max_buffered: NonZeroUsize::new(max_buffered).unwrap(),
        }
    }

    struct RunningWriter {
        handle: WriterHandle,
        stop: oneshot::Sender<()>,
        shutdown: Shutdown,
    }

    impl RunningWriter {
        async fn drain_and_stop(self) -> WriterHandle {
            self.handle.wait_drained(Duration::from_millis(10)).await;
            let _ = self.stop.send(());
            self.shutdown.shutdown().await;
            self.handle
        }
    }

    fn spawn_writer<S: DatapointSink, O: OverflowSink>(
        writer: DatapointWriter<S, O>,
    ) -> (RunningWriter, QueueSender) {
        let (tx, rx) = handoff_queue(NonZeroUsize::new(64).unwrap());
        let (stop, stop_rx) = oneshot::channel::<()>();
        let shutdown = Shutdown::new(async move {
            let _ = stop_rx.await;
        });
        let handle = writer.handle();
        shutdown.spawn_task_fn(async move |guard| writer.run(guard, rx).await);
        (
            RunningWriter {
                handle,
                stop,
                shutdown,
            },
            tx,
        )
    }

    /// Fails with the queued errors first, succeeds afterwards.
    #[derive(Default)]
    struct ScriptedSink {
        failures: Mutex<VecDeque<BoxError>>,
        attempts: AtomicUsize,
    }

    impl ScriptedSink {
        fn failing_with(errors: impl IntoIterator<Item = BoxError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(errors.into_iter().collect()),
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl DatapointSink for ScriptedSink {
        async fn send(&self, _batch: &[Datapoint]) -> Result<(), BoxError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn transient() -> BoxError {
        io::Error::from(io::ErrorKind::ConnectionReset).into()
    }

    fn fatal() -> BoxError {
        OpaqueError::from_display("status 401").into()
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_and_delivered() {
        let sink = ScriptedSink::failing_with([transient()]);
        let (writer, tx) = spawn_writer(DatapointWriter::new(sink.clone(), cfg(100, 1, 4)));

        tx.push(slice(10)).await.unwrap();
        drop(tx);

        let handle = writer.drain_and_stop().await;
        assert_eq!(sink.attempts(), 2);
        assert_eq!(handle.in_flight(), 0);

        let report = handle.report();
        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.datapoints_sent, 10);
        assert_eq!(report.retries, 1);
        assert_eq!(report.batches_failed, 0);
    }

    #[tokio::test]
    async fn non_transient_failure_is_attempted_once_and_discarded() {
        let sink = ScriptedSink::failing_with([fatal()]);
        let (writer, tx) = spawn_writer(DatapointWriter::new(sink.clone(), cfg(100, 1, 4)));

        tx.push(slice(5)).await.unwrap();
        drop(tx);

        let handle = writer.drain_and_stop().await;
        assert_eq!(sink.attempts(), 1);
        assert_eq!(handle.in_flight(), 0);

        let report = handle.report();
        assert_eq!(report.batches_sent, 0);
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.datapoints_failed, 5);
        assert_eq!(report.retries, 0);
    }

    #[tokio::test]
    async fn repeated_transient_failure_gives_up_after_retry() {
        let sink = ScriptedSink::failing_with([transient(), transient()]);
        let (writer, tx) = spawn_writer(DatapointWriter::new(sink.clone(), cfg(100, 1, 4)));

        tx.push(slice(5)).await.unwrap();
        drop(tx);

        let handle = writer.drain_and_stop().await;
        assert_eq!(sink.attempts(), 2);
        assert_eq!(handle.report().batches_failed, 1);
        assert_eq!(handle.in_flight(), 0);
    }

    #[tokio::test]
    async fn batches_never_exceed_max_batch_size() {
        let sink = MemorySink::recording();
        let (writer, tx) = spawn_writer(DatapointWriter::new(sink.clone(), cfg(7, 2, 64)));

        for n in [3, 20, 1, 7, 13, 100] {
            tx.push(slice(n)).await.unwrap();
        }
        drop(tx);

        writer.drain_and_stop().await;
        let sizes = sink.batch_sizes();
        assert!(sizes.iter().all(|size| (1..=7).contains(size)), "{sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 144);
    }

    /// Blocks every send until the gate hands out a permit.
    struct GatedSink {
        gate: Semaphore,
        current: AtomicUsize,
        max_seen: AtomicUsize,
        delivered: AtomicUsize,
    }

    impl Default for GatedSink {
        fn default() -> Self {
            Self {
                gate: Semaphore::new(0),
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            }
        }
    }

    impl DatapointSink for GatedSink {
        async fn send(&self, batch: &[Datapoint]) -> Result<(), BoxError> {
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(current, Ordering::SeqCst);

            let permit = self.gate.acquire().await?;
            permit.forget();

            self.current.fetch_sub(1, Ordering::SeqCst);
            self.delivered.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn concurrent_sends_are_bounded() {
        let sink = Arc::new(GatedSink::default());
        let (writer, tx) = spawn_writer(DatapointWriter::new(sink.clone(), cfg(1, 3, 64)));

        for _ in 0..10 {
            tx.push(slice(1)).await.unwrap();
        }
        drop(tx);

        wait_until(|| sink.current.load(Ordering::SeqCst) == 3).await;
        assert_eq!(writer.handle.in_flight(), 3);

        sink.gate.add_permits(10);
        let handle = writer.drain_and_stop().await;

        assert_eq!(sink.max_seen.load(Ordering::SeqCst), 3);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 10);
        assert_eq!(handle.in_flight(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_batches_and_notifies() {
        let sink = Arc::new(GatedSink::default());
        let overflows = Arc::new(AtomicUsize::new(0));
        let writer = DatapointWriter::new(sink.clone(), cfg(1, 1, 2)).with_overflow_sink({
            let overflows = overflows.clone();
            move || {
                overflows.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (writer, tx) = spawn_writer(writer);

        for _ in 0..6 {
            tx.push(slice(1)).await.unwrap();
        }
        drop(tx);

        // one batch in flight, two buffered, the other three dropped
        wait_until(|| overflows.load(Ordering::SeqCst) == 3).await;

        sink.gate.add_permits(10);
        let handle = writer.drain_and_stop().await;

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 3);
        let report = handle.report();
        assert_eq!(report.batches_dropped, 3);
        assert_eq!(report.datapoints_dropped, 3);
        assert_eq!(report.batches_sent, 3);
        assert_eq!(overflows.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_queue_drains_immediately() {
        let (writer, tx) = spawn_writer(DatapointWriter::new(MemorySink::discarding(), cfg(8, 1, 1)));
        drop(tx);

        let handle = writer.drain_and_stop().await;
        assert!(handle.is_drained());
        assert_eq!(handle.report(), DeliveryReport::default());
    }
}
