//! Rate limited synthetic datapoint generators.
//!
//! Each worker runs one [`Generator`] which produces counter datapoints
//! (the value being the sequence number of the point), and hands them
//! to the delivery engine in slices of a fixed size.

use std::{
    collections::HashMap,
    future::Future,
    num::{NonZeroU64, NonZeroUsize},
    sync::Arc,
};

use rama::telemetry::tracing;

use crate::{
    datapoint::{Batch, Datapoint, Dimensions, MetricKind},
    queue::QueueSender,
};

mod rate_limiter;
mod run_state;

pub use self::{
    rate_limiter::WaitCancelled,
    run_state::{RunState, StopLatch, run_state},
};

use self::rate_limiter::RateLimiter;

/// Parameters of a single generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Worker index, used to make the metric name unique per generator.
    pub index: usize,
    /// Datapoints per second, `0` means no throttling.
    pub rate: u64,
    /// Amount of datapoints per slice handed to the queue.
    pub batch_size: NonZeroUsize,
    /// Stop after this many datapoints.
    ///
    /// `None` when the generator runs until the [`RunState`] says stop.
    pub count: Option<NonZeroU64>,
}

pub struct Generator {
    index: usize,
    batch_size: NonZeroUsize,
    count: Option<NonZeroU64>,
    limiter: RateLimiter,
    run_state: RunState,
    queue: QueueSender,
    metric: Arc<str>,
    dimensions: Dimensions,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("index", &self.index)
            .field("metric", &self.metric)
            .finish()
    }
}

/// Summary of a generator that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorReport {
    pub worker: usize,
    pub emitted: u64,
    pub flushes: usize,
}

impl Generator {
    pub fn new(cfg: GeneratorConfig, run_state: RunState, queue: QueueSender) -> Self {
        Self {
            index: cfg.index,
            batch_size: cfg.batch_size,
            count: cfg.count,
            limiter: RateLimiter::new(cfg.rate, 1),
            run_state,
            queue,
            metric: metric_name(cfg.index).into(),
            dimensions: synthetic_dimensions(),
        }
    }

    /// Generate datapoints until the run state says stop or the configured count is reached.
    ///
    /// The `cancelled` future is the cancellation context of the rate limiter:
    /// once it resolves the generator gives up with [`GeneratorErrorKind::Cancelled`].
    pub async fn run<F>(mut self, cancelled: F) -> Result<GeneratorReport, GeneratorError>
    where
        F: Future,
    {
        let mut cancelled = std::pin::pin!(cancelled);

        if self.limiter.is_unlimited() {
            tracing::info!(metric = %self.metric, "generation of datapoints isn't being throttled");
        }

        let batch_size = self.batch_size.get();
        let mut emitted: u64 = 0;
        let mut flushes = 0;
        let mut slice: Batch = Vec::with_capacity(batch_size);

        while self.run_state.is_running() {
            slice.push(Datapoint::new(
                self.metric.clone(),
                self.dimensions.clone(),
                emitted as i64,
                MetricKind::Counter,
            ));

            if let Err(err) = self.limiter.wait(cancelled.as_mut()).await {
                tracing::error!(emitted, "limiter wait failed: {err}");
                // the point waiting for admission was never emitted
                slice.pop();
                if !slice.is_empty() {
                    self.flush(&mut slice, emitted).await?;
                }
                return Err(self.error(emitted, GeneratorErrorKind::Cancelled(err)));
            }

            emitted += 1;
            if emitted % batch_size as u64 == 0 {
                tracing::debug!(len = slice.len(), "adding slice to hand-off queue");
                self.flush(&mut slice, emitted).await?;
                flushes += 1;
            }

            if let Some(count) = self.count
                && emitted >= count.get()
            {
                break;
            }
        }

        if !slice.is_empty() {
            self.flush(&mut slice, emitted).await?;
            flushes += 1;
        }

        tracing::info!(emitted, flushes, "datapoints generated");
        Ok(GeneratorReport {
            worker: self.index,
            emitted,
            flushes,
        })
    }

    async fn flush(&self, slice: &mut Batch, emitted: u64) -> Result<(), GeneratorError> {
        let full = std::mem::replace(slice, Vec::with_capacity(self.batch_size.get()));
        self.queue
            .push(full)
            .await
            .map_err(|_| self.error(emitted, GeneratorErrorKind::QueueClosed))
    }

    fn error(&self, emitted: u64, kind: GeneratorErrorKind) -> GeneratorError {
        GeneratorError {
            worker: self.index,
            emitted,
            kind,
        }
    }
}

/// Metric name unique to a generator,
/// so the datapoints of different workers can be told apart at the endpoint.
pub fn metric_name(index: usize) -> String {
    format!("gensfxdp{index}")
}

const DIMENSION_VALUE: &str = "name-dim1Val-dim1Val-dim1Val-dim1Val-dim1Val-dim1Valname-dim1Val-dim1Val-dim1Val-dim1Val-dim1Val-dim1Valname-dim1Val-dim1Val-dim1Val-dim1Val-dim1Val-dim1Valname-dim1Val";

const DIMENSION_KEYS: [&str; 16] = [
    "source",
    "plugin",
    "testdim1",
    "testdim2",
    "testdim3",
    "testdim4",
    "testdim5",
    "testdim6",
    "testdim7",
    "testdim8",
    "testdim9",
    "testdim11",
    "testdim12",
    "testdim13",
    "testdim14",
    "testdim15",
];

/// Fixed, large label set simulating the label overhead of real-world datapoints.
pub fn synthetic_dimensions() -> Dimensions {
    Arc::new(
        DIMENSION_KEYS
            .iter()
            .map(|key| ((*key).to_owned(), DIMENSION_VALUE.to_owned()))
            .collect::<HashMap<_, _>>(),
    )
}

#[derive(Debug)]
pub struct GeneratorError {
    pub worker: usize,
    /// Datapoints emitted before the generator failed.
    pub emitted: u64,
    pub kind: GeneratorErrorKind,
}

#[derive(Debug)]
pub enum GeneratorErrorKind {
    /// The rate limiter's cancellation context fired.
    Cancelled(WaitCancelled),
    /// The delivery engine stopped consuming the hand-off queue.
    QueueClosed,
}

impl std::fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            GeneratorErrorKind::Cancelled(err) => write!(
                f,
                "generator #{} stopped after {} datapoints: {err}",
                self.worker, self.emitted
            ),
            GeneratorErrorKind::QueueClosed => write!(
                f,
                "generator #{} stopped after {} datapoints: hand-off queue closed",
                self.worker, self.emitted
            ),
        }
    }
}

impl std::error::Error for GeneratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            GeneratorErrorKind::Cancelled(err) => Some(err),
            GeneratorErrorKind::QueueClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datapoint::Value,
        queue::{QueueReceiver, handoff_queue},
    };
    use std::{future::pending, time::Duration};
    use tokio::time;

    fn generator(
        index: usize,
        rate: u64,
        batch_size: usize,
        count: Option<u64>,
        run_state: RunState,
    ) -> (Generator, QueueReceiver) {
        let (tx, rx) = handoff_queue(NonZeroUsize::new(1024).unwrap());
        let generator = Generator::new(
            GeneratorConfig {
                index,
                rate,
                batch_size: NonZeroUsize::new(batch_size).unwrap(),
                count: count.and_then(NonZeroU64::new),
            },
            run_state,
            tx,
        );
        (generator, rx)
    }

    fn collect(mut rx: QueueReceiver) -> Vec<Batch> {
        let mut slices = Vec::new();
        while let Some(slice) = rx.try_recv() {
            slices.push(slice);
        }
        slices
    }

    #[tokio::test(flavor = "current_thread")]
    async fn count_mode_flushes_full_slices_and_remainder() {
        let (_latch, state) = run_state();
        let (generator, rx) = generator(0, 0, 100, Some(250), state);

        let report = generator.run(pending::<()>()).await.unwrap();
        assert_eq!(
            report,
            GeneratorReport {
                worker: 0,
                emitted: 250,
                flushes: 3,
            }
        );

        let slices = collect(rx);
        let sizes: Vec<_> = slices.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let values: Vec<_> = slices.iter().flatten().map(|dp| dp.value).collect();
        let expected: Vec<_> = (0..250).map(Value::Int).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn count_mode_with_exact_multiple_does_not_push_empty_slice() {
        let (_latch, state) = run_state();
        let (generator, rx) = generator(0, 0, 10, Some(30), state);

        let report = generator.run(pending::<()>()).await.unwrap();
        assert_eq!(report.emitted, 30);
        assert_eq!(report.flushes, 3);
        assert!(collect(rx).iter().all(|slice| slice.len() == 10));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn datapoints_carry_generator_specific_metric_and_dimensions() {
        let (_latch, state) = run_state();
        let (generator, rx) = generator(7, 0, 5, Some(5), state);

        generator.run(pending::<()>()).await.unwrap();

        let slices = collect(rx);
        let dp = &slices[0][0];
        assert_eq!(&*dp.metric, "gensfxdp7");
        assert_eq!(dp.kind, MetricKind::Counter);
        assert_eq!(dp.dimensions.len(), 16);
        assert_eq!(dp.dimensions["source"], DIMENSION_VALUE);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stopped_run_state_emits_nothing() {
        let (latch, state) = run_state();
        latch.stop();
        let (generator, rx) = generator(0, 0, 10, None, state);

        let report = generator.run(pending::<()>()).await.unwrap();
        assert_eq!(report.emitted, 0);
        assert_eq!(report.flushes, 0);
        assert!(collect(rx).is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_state_mode_stops_after_latch_flips() {
        time::pause();

        let (latch, state) = run_state();
        let (generator, rx) = generator(0, 10, 100, None, state);

        let h = tokio::spawn(generator.run(pending::<()>()));
        time::sleep(Duration::from_secs(1)).await;
        assert!(latch.stop());

        let report = h.await.unwrap().unwrap();
        assert!(
            (9..=12).contains(&report.emitted),
            "emitted: {}",
            report.emitted
        );

        let total: usize = collect(rx).iter().map(Vec::len).sum();
        assert_eq!(total as u64, report.emitted);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_limiter_fails_generator_and_keeps_emitted_points() {
        time::pause();

        let (_latch, state) = run_state();
        let (generator, rx) = generator(3, 1, 100, None, state);

        let err = generator
            .run(time::sleep(Duration::from_millis(2500)))
            .await
            .unwrap_err();
        assert_eq!(err.worker, 3);
        assert_eq!(err.emitted, 3);
        assert!(matches!(err.kind, GeneratorErrorKind::Cancelled(_)));

        let total: usize = collect(rx).iter().map(Vec::len).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closed_queue_fails_generator() {
        let (_latch, state) = run_state();
        let (generator, rx) = generator(1, 0, 2, Some(10), state);
        drop(rx);

        let err = generator.run(pending::<()>()).await.unwrap_err();
        assert!(matches!(err.kind, GeneratorErrorKind::QueueClosed));
        assert_eq!(err.emitted, 2);
    }
}
