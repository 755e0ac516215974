use std::{
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use crate::{
    queue::DEFAULT_QUEUE_CAPACITY,
    writer::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BUFFERED, DEFAULT_MAX_REQUESTS, WriterConfig},
};

/// Load shape and delivery limits of a single run.
///
/// This models how datapoints are produced over time
/// and how many resources may be used to ship them.
#[derive(Debug, Clone, clap::Args)]
pub struct PipelineConfig {
    /// Number of concurrent datapoint generators.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub workers: usize,

    /// Datapoints per second per worker (0 = unlimited).
    #[arg(long, value_name = "DP/S", default_value_t = 0)]
    pub rate: u64,

    /// How long to generate datapoints for (0 = use --metrics instead).
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    pub duration: Duration,

    /// Datapoints to generate per worker, only used when --duration is 0.
    #[arg(long = "metrics", value_name = "N", default_value_t = 1)]
    pub count_per_worker: u64,

    /// Datapoints a worker accumulates before handing them off.
    #[arg(long = "batch-writer-size", value_name = "N", default_value_t = 100)]
    pub batch_size: usize,

    /// Maximum datapoints in a single request.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Maximum number of in flight requests.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_REQUESTS)]
    pub max_requests: usize,

    /// Full batches which may wait for a free request slot before the oldest is dropped.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_BUFFERED)]
    pub max_buffered: usize,

    /// Capacity of the hand-off queue, in worker batches.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// How often to re-check for in flight requests while draining.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub drain_poll_interval: Duration,

    /// Extra wait after draining before the delivery engine is stopped.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub drain_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rate: 0,
            duration: Duration::ZERO,
            count_per_worker: 1,
            batch_size: 100,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_requests: DEFAULT_MAX_REQUESTS,
            max_buffered: DEFAULT_MAX_BUFFERED,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_poll_interval: Duration::from_secs(1),
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// What ends the generation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Generate until the duration elapsed, the per-worker count is ignored.
    Duration(Duration),
    /// Each worker generates exactly this many datapoints.
    Count(NonZeroU64),
}

impl PipelineConfig {
    /// Duration takes precedence over the per-worker count.
    pub fn run_mode(&self) -> Result<RunMode, ConfigError> {
        if !self.duration.is_zero() {
            return Ok(RunMode::Duration(self.duration));
        }
        NonZeroU64::new(self.count_per_worker)
            .map(RunMode::Count)
            .ok_or(ConfigError::NoStopCondition)
    }

    pub fn validate(&self) -> Result<PipelinePlan, ConfigError> {
        let run_mode = self.run_mode()?;
        if self.drain_poll_interval.is_zero() {
            return Err(ConfigError::Zero("drain poll interval"));
        }

        Ok(PipelinePlan {
            run_mode,
            workers: non_zero(self.workers, "workers")?,
            rate: self.rate,
            batch_size: non_zero(self.batch_size, "batch writer size")?,
            writer: WriterConfig {
                max_batch_size: non_zero(self.max_batch_size, "max batch size")?,
                max_requests: non_zero(self.max_requests, "max requests")?,
                max_buffered: non_zero(self.max_buffered, "max buffered")?,
            },
            queue_capacity: non_zero(self.queue_capacity, "queue capacity")?,
            drain_poll_interval: self.drain_poll_interval,
            drain_grace: self.drain_grace,
        })
    }
}

fn non_zero(value: usize, name: &'static str) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value).ok_or(ConfigError::Zero(name))
}

/// Validated, immutable snapshot of a [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub run_mode: RunMode,
    pub workers: NonZeroUsize,
    pub rate: u64,
    pub batch_size: NonZeroUsize,
    pub writer: WriterConfig,
    pub queue_capacity: NonZeroUsize,
    pub drain_poll_interval: Duration,
    pub drain_grace: Duration,
}

impl PipelinePlan {
    /// Per-worker count, `None` for duration based runs.
    pub fn count_per_worker(&self) -> Option<NonZeroU64> {
        match self.run_mode {
            RunMode::Duration(_) => None,
            RunMode::Count(count) => Some(count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither a duration nor a per-worker count was given.
    NoStopCondition,
    /// A setting which has to be positive is zero.
    Zero(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStopCondition => f.write_str(
                "no stop condition: set a duration or a positive number of metrics per worker",
            ),
            Self::Zero(name) => write!(f, "{name} has to be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
