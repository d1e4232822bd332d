//! # Window Pipeline
//!
//! Wires the shared pieces of a run together: one coordinator, one snapshot
//! queue and one snapshot store, plus a consumer task that moves snapshots
//! from the queue into the store and an optional [`SnapshotSink`].
//!
//! ```text
//! aggregators ──(tick)──> collectors ──> SnapshotQueue ──> consumer ──> SnapshotStore
//!                                                                  └──> SnapshotSink
//! ```
//!
//! A typical run creates the pipeline, calls [`WindowPipeline::start`],
//! attaches one collector per iteration as iterations begin, and finally
//! calls [`WindowPipeline::shutdown`] which forces the last window and lets
//! the consumer drain what is left.

use crate::aggregators::IterationAggregators;
use crate::collector::{
    CollectorBuilder, ExecutionContext, IterationStatusOracle, IterationWindowCollector,
};
use crate::config::PipelineConfig;
use crate::coordinator::WindowCoordinator;
use crate::error::{QueueError, WindowError};
use crate::queue::SnapshotQueue;
use crate::sink::SnapshotSink;
use crate::snapshot::IterationDescriptor;
use crate::store::SnapshotStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the consumer task saw before it exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub final_snapshots: u64,
    pub sink_errors: u64,
}

/// Coordinator, queue and store for one test run
pub struct WindowPipeline {
    config: PipelineConfig,
    coordinator: WindowCoordinator,
    queue: Arc<SnapshotQueue>,
    store: Arc<SnapshotStore>,
    oracle: Arc<dyn IterationStatusOracle>,
    context: ExecutionContext,
    cancel: CancellationToken,
}

impl WindowPipeline {
    /// Build a stopped pipeline
    ///
    /// ## Parameters
    /// - `config`: window length and capacities, validated here
    /// - `oracle`: status source shared by every attached iteration
    /// - `context`: plan metadata stamped on every snapshot
    ///
    /// ## Returns
    ///
    /// `WindowError::InvalidConfig` when the configuration is rejected.
    pub fn new(
        config: PipelineConfig,
        oracle: Arc<dyn IterationStatusOracle>,
        context: ExecutionContext,
    ) -> Result<Self, WindowError> {
        config.validate()?;

        Ok(Self {
            coordinator: WindowCoordinator::new(config.window_interval)?,
            queue: Arc::new(SnapshotQueue::new(config.queue_capacity)?),
            store: Arc::new(SnapshotStore::new(config.history_capacity)?),
            oracle,
            context,
            cancel: CancellationToken::new(),
            config,
        })
    }

    /// Configuration the pipeline was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared window timer driving every attached iteration
    pub fn coordinator(&self) -> &WindowCoordinator {
        &self.coordinator
    }

    /// Queue between the collectors and the consumer
    pub fn queue(&self) -> &Arc<SnapshotQueue> {
        &self.queue
    }

    /// History filled by the consumer task
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Plan metadata stamped on each snapshot
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Token that stops the consumer task without waiting for the queue to drain
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the window timer
    pub fn start(&self) -> Result<(), WindowError> {
        self.coordinator.start()
    }

    /// Create aggregators and a subscribed collector for a starting iteration
    ///
    /// The execution engine records into `collector.aggregators()`.
    pub fn attach_iteration(
        &self,
        descriptor: IterationDescriptor,
    ) -> Result<Arc<IterationWindowCollector>, WindowError> {
        let aggregators = IterationAggregators::new(descriptor.id, &descriptor.round_name)?;
        CollectorBuilder::new(descriptor)
            .aggregators(aggregators)
            .queue(Arc::clone(&self.queue))
            .coordinator(self.coordinator.clone())
            .oracle(Arc::clone(&self.oracle))
            .context(self.context.clone())
            .build()
    }

    /// Spawn the consumer loop on the current Tokio runtime
    ///
    /// The task runs until the pipeline's cancellation token fires or the
    /// queue is closed and drained, then flushes the sink.
    pub fn spawn_consumer(&self, sink: Option<Box<dyn SnapshotSink>>) -> JoinHandle<ConsumerStats> {
        tokio::spawn(consume(
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            sink,
            self.cancel.clone(),
        ))
    }

    /// Stop the coordinator (delivering the last window) and close the queue
    pub fn shutdown(&self) {
        let was_running = self.coordinator.stop();
        self.queue.close();
        debug!(
            "Window pipeline shut down (coordinator was running: {}, queue: {:?})",
            was_running,
            self.queue.stats()
        );
    }
}

impl std::fmt::Debug for WindowPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPipeline")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("queue", &self.queue)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

async fn consume(
    queue: Arc<SnapshotQueue>,
    store: Arc<SnapshotStore>,
    mut sink: Option<Box<dyn SnapshotSink>>,
    cancel: CancellationToken,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();

    loop {
        let snapshot = match queue.dequeue(&cancel).await {
            Ok(snapshot) => snapshot,
            Err(QueueError::Cancelled) => {
                debug!("Snapshot consumer cancelled");
                break;
            }
            Err(QueueError::Closed) => break,
        };

        stats.received += 1;
        if snapshot.is_final {
            stats.final_snapshots += 1;
        }

        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.write_snapshot(&snapshot) {
                stats.sink_errors += 1;
                warn!(
                    "Failed to write window {} of iteration {}: {:#}",
                    snapshot.window_sequence, snapshot.iteration_id, e
                );
            }
        }

        store.push(snapshot);
    }

    if let Some(sink) = sink.as_mut() {
        if let Err(e) = sink.flush() {
            stats.sink_errors += 1;
            warn!("Failed to flush snapshot sink: {:#}", e);
        }
    }

    debug!("Snapshot consumer finished: {:?}", stats);
    stats
}
