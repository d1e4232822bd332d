//! # Windowed Metrics - Main Entry Point
//!
//! Demo driver for the windowed metrics pipeline. It simulates a load test
//! with several iterations of synthetic HTTP traffic and streams one snapshot
//! per iteration per window through the full pipeline:
//!
//! 1. **Initialize logging**: colourised `tracing` output filtered by `RUST_LOG`
//! 2. **Parse arguments**: window length, load shape, capacities, output file
//! 3. **Build the pipeline**: coordinator, queue, store and consumer task
//! 4. **Run iterations**: one collector and one simulated load per iteration,
//!    started a half window apart so early windows show pending iterations
//! 5. **Shut down**: force the last window, drain the queue, print a summary
//!
//! Ctrl-C cancels the running iterations; they are reported as `cancelled`
//! and the pipeline still flushes their final windows.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use windowed_metrics::{
    cli::Args,
    logging::ColorizedFormatter,
    metrics::utils::{format_latency_ms, format_throughput},
    simulation::{LoadProfile, SimulatedLoad, SimulationReport},
    utils::{format_bytes, format_duration, format_percent, print_table_row, print_table_separator},
    ConsumerStats, ExecutionContext, IterationDescriptor, JsonLinesSink, PipelineConfig,
    SnapshotSink, StatusBoard, WindowPipeline, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins when set; otherwise --verbose picks debug over info.
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(ColorizedFormatter)
        .init();

    info!("Starting Windowed Metrics v{}", VERSION);
    info!("Configuration: {:?}", args);

    let config = PipelineConfig::from(&args);
    config.validate()?;

    let board = Arc::new(StatusBoard::new());
    let context = ExecutionContext::new(args.plan_name.clone(), Utc::now());
    let pipeline = WindowPipeline::new(config, board.clone(), context)?;

    let sink: Option<Box<dyn SnapshotSink>> = match args.output {
        Some(ref path) => {
            info!("Writing window snapshots to: {:?}", path);
            Some(Box::new(JsonLinesSink::create(path)?))
        }
        None => None,
    };

    pipeline.start()?;
    let consumer = pipeline.spawn_consumer(sink);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running iterations");
                cancel.cancel();
            }
        });
    }

    let profile = LoadProfile {
        concurrency: args.concurrency,
        duration: args.duration,
        failure_rate: args.failure_rate,
    };
    let stagger = args.window_interval / 2;

    let mut descriptors = Vec::with_capacity(args.iterations);
    let mut runs = Vec::with_capacity(args.iterations);
    for i in 0..args.iterations {
        let descriptor = IterationDescriptor::new(
            "round-1",
            format!("iteration-{}", i + 1),
            args.target_url.clone(),
        );
        let collector = pipeline.attach_iteration(descriptor.clone())?;
        let load = SimulatedLoad::new(
            collector.aggregators().clone(),
            board.clone(),
            profile.clone(),
        );
        let cancel = cancel.clone();
        let delay = stagger * i as u32;

        info!(
            "Scheduled {} ({}) to start in {}",
            descriptor.iteration_name,
            descriptor.id,
            format_duration(delay)
        );
        descriptors.push(descriptor);
        runs.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
            load.run(cancel).await
        }));
    }

    let mut reports = Vec::with_capacity(runs.len());
    for run in runs {
        match run.await {
            Ok(report) => {
                info!(
                    "Iteration {} finished: {} after {} requests",
                    report.iteration_id, report.status, report.requests
                );
                reports.push(report);
            }
            Err(e) => error!("Iteration task failed: {}", e),
        }
    }

    pipeline.shutdown();
    let consumer_stats = consumer.await.context("Snapshot consumer task failed")?;

    print_summary(&pipeline, &descriptors, &reports, consumer_stats);

    info!("Windowed Metrics completed successfully");
    Ok(())
}

/// Print one row per iteration from the stored snapshot history
fn print_summary(
    pipeline: &WindowPipeline,
    descriptors: &[IterationDescriptor],
    reports: &[SimulationReport],
    consumer_stats: ConsumerStats,
) {
    let store = pipeline.store();
    let widths = [12, 10, 8, 9, 10, 10, 10, 12];

    println!();
    print_table_separator(&widths);
    print_table_row(
        &[
            "Iteration",
            "Status",
            "Windows",
            "Requests",
            "Errors",
            "Peak RPS",
            "Last p95",
            "Received",
        ],
        &widths,
    );
    print_table_separator(&widths);

    for descriptor in descriptors {
        let history = store.history(descriptor.id);
        let report = reports.iter().find(|r| r.iteration_id == descriptor.id);

        let status = store
            .latest(descriptor.id)
            .map(|s| s.execution_status.to_string())
            .unwrap_or_else(|| "-".to_string());
        let requests = report.map_or(0, |r| r.requests);
        let error_rate = match report {
            Some(r) if r.requests > 0 => r.failures as f64 / r.requests as f64 * 100.0,
            _ => 0.0,
        };
        let peak_rps = history
            .iter()
            .filter_map(|s| s.throughput.as_ref())
            .map(|t| t.requests_per_second)
            .fold(0.0, f64::max);
        let last_p95 = history
            .iter()
            .rev()
            .find_map(|s| s.duration.as_ref())
            .map_or(0.0, |d| d.total_time.p95);
        let received: u64 = history
            .iter()
            .filter_map(|s| s.data_transmission.as_ref())
            .map(|d| d.data_received)
            .sum();

        let windows = history.len().to_string();
        let requests = requests.to_string();
        let errors = format_percent(error_rate);
        let peak_rps = format!("{:.1}", peak_rps);
        let last_p95 = format_latency_ms(last_p95);
        let received = format_bytes(received);
        print_table_row(
            &[
                descriptor.iteration_name.as_str(),
                status.as_str(),
                windows.as_str(),
                requests.as_str(),
                errors.as_str(),
                peak_rps.as_str(),
                last_p95.as_str(),
                received.as_str(),
            ],
            &widths,
        );
    }
    print_table_separator(&widths);
    println!();

    let queue_stats = pipeline.queue().stats();
    info!(
        "Consumer received {} snapshots ({} final, {} sink errors)",
        consumer_stats.received, consumer_stats.final_snapshots, consumer_stats.sink_errors
    );
    info!(
        "Queue: {} enqueued, {} dropped (capacity {})",
        queue_stats.enqueued, queue_stats.dropped, queue_stats.capacity
    );

    let peak_bandwidth = descriptors
        .iter()
        .flat_map(|d| store.history(d.id))
        .filter_map(|s| s.data_transmission.as_ref().map(|d| d.throughput_bps))
        .fold(0.0, f64::max);
    info!("Peak window bandwidth: {}", format_throughput(peak_bandwidth));
}
