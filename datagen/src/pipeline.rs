//! Lifecycle of a single load generation run.
//!
//! Starts the delivery engine and one generator per worker,
//! enforces the stop condition, and drains the engine before shutting it down.

use std::{
    pin::pin,
    time::{Duration, Instant},
};

use rama::{
    graceful::{Shutdown, ShutdownGuard},
    telemetry::tracing::{self, Instrument as _},
};
use tokio::{
    sync::{oneshot, watch},
    task::JoinSet,
};

use crate::{
    config::{ConfigError, PipelineConfig, PipelinePlan, RunMode},
    generator::{Generator, GeneratorConfig, GeneratorError, GeneratorReport, run_state},
    queue::handoff_queue,
    sink::DatapointSink,
    writer::{DatapointWriter, DeliveryReport, LogOverflow, OverflowSink, WriterHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configuring,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Configuring => "configuring",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

pub type GeneratorOutcome = Result<GeneratorReport, GeneratorError>;

#[derive(Debug)]
pub struct RunReport {
    /// One outcome per generator that ran to an end, ordered by worker index.
    pub generators: Vec<GeneratorOutcome>,
    pub delivery: DeliveryReport,
    pub elapsed: Duration,
}

impl RunReport {
    /// Datapoints emitted across all generators, including failed ones.
    pub fn emitted(&self) -> u64 {
        self.generators
            .iter()
            .map(|outcome| match outcome {
                Ok(report) => report.emitted,
                Err(err) => err.emitted,
            })
            .sum()
    }

    pub fn failed_generators(&self) -> usize {
        self.generators.iter().filter(|o| o.is_err()).count()
    }
}

pub struct Pipeline<S, O = LogOverflow> {
    plan: PipelinePlan,
    writer: DatapointWriter<S, O>,
    state: watch::Sender<PipelineState>,
}

impl<S, O> std::fmt::Debug for Pipeline<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("plan", &self.plan)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<S: DatapointSink> Pipeline<S> {
    /// Validate `cfg` and bind the pipeline to `sink`.
    pub fn new(cfg: &PipelineConfig, sink: S) -> Result<Self, ConfigError> {
        let (state, _) = watch::channel(PipelineState::Configuring);
        let plan = cfg.validate().inspect_err(|err| {
            tracing::error!("invalid pipeline configuration: {err}");
        })?;
        let writer = DatapointWriter::new(sink, plan.writer);
        Ok(Self {
            plan,
            writer,
            state,
        })
    }
}

impl<S: DatapointSink, O: OverflowSink> Pipeline<S, O> {
    pub fn with_overflow_sink<O2: OverflowSink>(self, overflow: O2) -> Pipeline<S, O2> {
        Pipeline {
            plan: self.plan,
            writer: self.writer.with_overflow_sink(overflow),
            state: self.state,
        }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Follow the state transitions, also after the pipeline got moved into [`Self::run`].
    ///
    /// The run yields after every transition, so a subscriber sharing
    /// a current-thread runtime with it observes each state in order.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn writer_handle(&self) -> WriterHandle {
        self.writer.handle()
    }

    /// Run the pipeline to completion.
    ///
    /// Cancelling `guard` stops generation early (paced generators
    /// end with a cancelled error) and skips the grace period,
    /// but what was generated so far is still delivered.
    pub async fn run(self, guard: ShutdownGuard) -> RunReport {
        let Self {
            plan,
            writer,
            state,
        } = self;
        let start = Instant::now();

        transition(&state, PipelineState::Starting).await;

        let (queue_tx, queue_rx) = handoff_queue(plan.queue_capacity);

        let writer_handle = writer.handle();
        let (stop_engine_tx, stop_engine_rx) = oneshot::channel::<()>();
        let engine = Shutdown::new(async move {
            let _ = stop_engine_rx.await;
        });
        engine.spawn_task_fn(async move |engine_guard| writer.run(engine_guard, queue_rx).await);

        let (latch, run_state) = run_state();
        let mut generators = JoinSet::new();
        for index in 0..plan.workers.get() {
            let generator = Generator::new(
                GeneratorConfig {
                    index,
                    rate: plan.rate,
                    batch_size: plan.batch_size,
                    count: plan.count_per_worker(),
                },
                run_state.clone(),
                queue_tx.clone(),
            );
            let cancelled = guard.clone_weak().into_cancelled();
            generators.spawn(
                generator
                    .run(cancelled)
                    .instrument(tracing::info_span!("generator", worker = index)),
            );
        }
        // the queue closes once the last generator is done
        drop(queue_tx);

        transition(&state, PipelineState::Running).await;

        let run_mode = plan.run_mode;
        let mut stop_timer = pin!(async move {
            match run_mode {
                RunMode::Duration(duration) => tokio::time::sleep(duration).await,
                RunMode::Count(_) => std::future::pending().await,
            }
        });
        let mut stopped = false;
        let mut outcomes = Vec::with_capacity(plan.workers.get());

        loop {
            tokio::select! {
                _ = &mut stop_timer, if !stopped => {
                    tracing::info!("run duration elapsed: stop generators");
                    latch.stop();
                    stopped = true;
                }
                _ = guard.cancelled(), if !stopped => {
                    tracing::info!("shutdown requested: stop generators early");
                    latch.stop();
                    stopped = true;
                }
                joined = generators.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok(Ok(report)) => {
                            tracing::debug!(worker = report.worker, emitted = report.emitted, "generator finished");
                            outcomes.push(Ok(report));
                        }
                        Ok(Err(err)) => {
                            tracing::error!(worker = err.worker, "generator failed: {err}");
                            outcomes.push(Err(err));
                        }
                        Err(err) => {
                            tracing::error!("generator task failed to join: {err}");
                        }
                    }
                }
            }
        }

        outcomes.sort_by_key(|outcome| match outcome {
            Ok(report) => report.worker,
            Err(err) => err.worker,
        });

        transition(&state, PipelineState::Draining).await;

        writer_handle.wait_drained(plan.drain_poll_interval).await;
        tracing::debug!(grace = ?plan.drain_grace, "delivery engine drained");

        tokio::select! {
            _ = tokio::time::sleep(plan.drain_grace) => {}
            _ = guard.cancelled() => {
                tracing::debug!("shutdown requested: skip drain grace period");
            }
        }

        let _ = stop_engine_tx.send(());
        let delay = engine.shutdown().await;
        tracing::debug!("delivery engine shutdown with a delay of: {delay:?}");

        transition(&state, PipelineState::Stopped).await;

        let report = RunReport {
            generators: outcomes,
            delivery: writer_handle.report(),
            elapsed: start.elapsed(),
        };
        tracing::info!(
            emitted = report.emitted(),
            sent = report.delivery.datapoints_sent,
            failed = report.delivery.datapoints_failed,
            dropped = report.delivery.datapoints_dropped,
            elapsed = ?report.elapsed,
            "pipeline finished",
        );
        report
    }
}

async fn transition(state: &watch::Sender<PipelineState>, next: PipelineState) {
    let previous = state.send_replace(next);
    tracing::info!(%previous, %next, "pipeline state transition");
    // let subscribers see this state before the next one replaces it
    tokio::task::yield_now().await;
}
