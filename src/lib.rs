//! # Windowed Metrics Library
//!
//! Per-iteration, time-windowed metrics aggregation for an HTTP load tester.
//!
//! While a load test runs, the execution engine records every request into a
//! set of aggregators owned by the iteration that issued it. A shared timer
//! closes a window every few seconds; at that moment each live iteration's
//! collector reads its aggregators, assembles one snapshot describing just
//! that window, and hands it to a bounded queue. A consumer moves snapshots
//! from the queue into a per-iteration history that dashboards can read.
//!
//! ## Architecture Overview
//!
//! - `metrics`: HDR-histogram backed timing accumulator (count, sum, min, max, percentiles)
//! - `aggregators`: duration, throughput, response-code and data-transmission aggregators
//! - `coordinator`: the shared window timer and its subscriber list
//! - `collector`: binds one iteration's aggregators to the timer and its lifecycle
//! - `queue`: bounded drop-oldest hand-off between collectors and consumers
//! - `store`: bounded per-iteration snapshot history
//! - `pipeline`: wires coordinator, queue, store and consumer together
//! - `sink`: optional consumer-side outputs (JSON lines)
//! - `simulation`: synthetic traffic used by the demo binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use windowed_metrics::{
//!     ExecutionContext, ExecutionStatus, IterationDescriptor, PipelineConfig, StatusBoard,
//!     WindowPipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let board = Arc::new(StatusBoard::new());
//!     let context = ExecutionContext::new("checkout-plan", chrono::Utc::now());
//!     let pipeline = WindowPipeline::new(PipelineConfig::default(), board.clone(), context)?;
//!     pipeline.start()?;
//!     let consumer = pipeline.spawn_consumer(None);
//!
//!     let collector = pipeline.attach_iteration(IterationDescriptor::new(
//!         "round-1",
//!         "browse",
//!         "http://localhost:8080/",
//!     ))?;
//!     board.set(collector.iteration_id(), ExecutionStatus::Ongoing);
//!     collector.aggregators().response_codes.update_response_code(200, "OK");
//!
//!     board.set(collector.iteration_id(), ExecutionStatus::Success);
//!     pipeline.shutdown();
//!     let stats = consumer.await?;
//!     println!("received {} snapshots", stats.received);
//!     Ok(())
//! }
//! ```

/// Windowed aggregators and the per-iteration bundle
///
/// Each aggregator accumulates one kind of metric for one iteration and
/// publishes it only through snapshot-and-reset or snapshot-without-reset.
pub mod aggregators;

/// Command-line interface for the demo binary
///
/// Duration flags accept human-readable formats (e.g. "500ms", "10s", "5m").
pub mod cli;

/// Per-iteration window collector and the status oracle it consults
pub mod collector;

pub mod config;

/// Shared window timer
///
/// Closes a window on every tick, on demand, and once more when stopped,
/// delivering each closed window to every subscriber.
pub mod coordinator;

pub mod error;
pub mod logging;

/// Timing accumulation using HDR histograms
pub mod metrics;

pub mod pipeline;
pub mod queue;
pub mod simulation;
pub mod sink;

/// Snapshot data model shared by every component
pub mod snapshot;

pub mod store;
pub mod utils;

pub use aggregators::{
    DataTransmissionAggregator, DurationAggregator, IterationAggregators, RequestOutcome,
    ResponseCodeAggregator, SnapshotMode, ThroughputAggregator, WindowedAggregator,
};
pub use cli::Args;
pub use collector::{
    CollectorBuilder, ExecutionContext, IterationStatusOracle, IterationWindowCollector,
    StatusBoard,
};
pub use config::PipelineConfig;
pub use coordinator::{SubscriptionId, WindowClosed, WindowCoordinator, WindowSubscriber, WindowTrigger};
pub use error::{QueueError, WindowError};
pub use metrics::TimingAccumulator;
pub use pipeline::{ConsumerStats, WindowPipeline};
pub use queue::{QueueStats, SnapshotQueue};
pub use sink::{JsonLinesSink, SnapshotSink};
pub use snapshot::{
    DataTransmissionMetric, DurationMetric, ExecutionStatus, IterationDescriptor, IterationId,
    ResponseCodeEntry, ResponseCodeMetric, StatusPhase, ThroughputMetric, TimingMetric,
    WindowedIterationSnapshot,
};
pub use store::SnapshotStore;

/// The current version of the crate, from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default window length
    ///
    /// Short enough for a dashboard to feel live, long enough that each
    /// window holds a meaningful sample at moderate request rates.
    pub const WINDOW_INTERVAL: Duration = Duration::from_secs(5);

    /// Default snapshot queue capacity
    ///
    /// With one snapshot per iteration per window this absorbs a slow
    /// consumer for several windows before the oldest snapshots are dropped.
    pub const QUEUE_CAPACITY: usize = 1000;

    /// Default number of snapshots kept per iteration in the store
    pub const HISTORY_CAPACITY: usize = 2048;

    /// Default load duration per simulated iteration
    pub const RUN_DURATION: Duration = Duration::from_secs(20);

    /// Default number of simulated iterations
    pub const ITERATIONS: usize = 3;

    /// Default virtual users per simulated iteration
    pub const CONCURRENCY: usize = 4;

    /// Default probability that a simulated request fails
    pub const FAILURE_RATE: f64 = 0.05;

    pub const PLAN_NAME: &str = "demo-plan";

    pub const TARGET_URL: &str = "http://localhost:8080/";
}
