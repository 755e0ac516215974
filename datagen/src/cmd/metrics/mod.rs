use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    telemetry::tracing,
};

use clap::Args;
use datagen::{
    config::{EndpointConfig, PipelineConfig, RunMode},
    pipeline::{Pipeline, RunReport},
    sink::{DatapointSink, HttpSink, MemorySink},
};

mod client;

#[derive(Debug, Clone, Args)]
/// generate synthetic datapoints and ship them to an ingest endpoint
pub struct MetricsCommand {
    #[command(flatten)]
    pipeline: PipelineConfig,

    #[command(flatten)]
    endpoint: EndpointConfig,

    /// generate and batch datapoints without sending them anywhere
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

pub async fn exec(guard: ShutdownGuard, args: MetricsCommand) -> Result<(), OpaqueError> {
    if args.dry_run {
        tracing::info!("dry run: datapoints are discarded after batching");
        let sink = MemorySink::discarding();
        let report = run_pipeline(guard, &args.pipeline, sink.clone()).await?;
        tracing::info!(
            batches = sink.batch_count(),
            datapoints = sink.datapoint_count(),
            elapsed = ?report.elapsed,
            "dry run finished",
        );
        return Ok(());
    }

    let sink_cfg = args
        .endpoint
        .sink_config()
        .context("create ingest sink config")?;
    tracing::info!(
        endpoint = %sink_cfg.endpoint,
        timeout = ?sink_cfg.timeout,
        authenticated = sink_cfg.access_token.is_some(),
        proxied = args.endpoint.proxy.is_some(),
        "ingest endpoint ready",
    );
    if sink_cfg.access_token.is_none() {
        tracing::warn!("no access token configured: the ingest endpoint will most likely reject all datapoints");
    }

    let client = self::client::new_ingest_client(args.endpoint.proxy.clone())
        .context("create ingest web client")?;
    run_pipeline(guard, &args.pipeline, HttpSink::new(client, sink_cfg)).await?;
    Ok(())
}

async fn run_pipeline<S: DatapointSink>(
    guard: ShutdownGuard,
    cfg: &PipelineConfig,
    sink: S,
) -> Result<RunReport, OpaqueError> {
    let pipeline = Pipeline::new(cfg, sink).context("validate pipeline config")?;

    let plan = pipeline.plan();
    match plan.run_mode {
        RunMode::Duration(duration) => tracing::info!(
            workers = plan.workers.get(),
            rate = plan.rate,
            ?duration,
            "generate datapoints for a fixed duration",
        ),
        RunMode::Count(count) => tracing::info!(
            workers = plan.workers.get(),
            rate = plan.rate,
            %count,
            "generate a fixed amount of datapoints per worker",
        ),
    }
    tracing::info!(
        batch_size = plan.batch_size.get(),
        max_batch_size = plan.writer.max_batch_size.get(),
        max_requests = plan.writer.max_requests.get(),
        max_buffered = plan.writer.max_buffered.get(),
        queue_capacity = plan.queue_capacity.get(),
        "delivery parameters ready",
    );

    let report = pipeline.run(guard).await;

    for outcome in &report.generators {
        match outcome {
            Ok(generator) => tracing::info!(
                worker = generator.worker,
                emitted = generator.emitted,
                flushes = generator.flushes,
                "generator report",
            ),
            Err(err) => tracing::warn!(worker = err.worker, "generator report: {err}"),
        }
    }

    let delivery = report.delivery;
    tracing::info!(
        batches_sent = delivery.batches_sent,
        datapoints_sent = delivery.datapoints_sent,
        batches_failed = delivery.batches_failed,
        datapoints_failed = delivery.datapoints_failed,
        retries = delivery.retries,
        batches_dropped = delivery.batches_dropped,
        datapoints_dropped = delivery.datapoints_dropped,
        "delivery report",
    );
    if report.failed_generators() > 0 {
        tracing::warn!(
            failed = report.failed_generators(),
            "not all generators finished cleanly",
        );
    }

    Ok(report)
}
