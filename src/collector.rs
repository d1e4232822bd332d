//! # Iteration Window Collector
//!
//! Binds one iteration's aggregators to the shared [`WindowCoordinator`].
//!
//! On every closed window the collector asks the status oracle where its
//! iteration is in its lifecycle and acts on the answer:
//!
//! - **Pending** (`not_started`, `scheduled`): nothing is reported; only the
//!   rate clocks restart.
//! - **Active** (`ongoing`, `ongoing_scheduled`, `partially_skipped`): every
//!   aggregator is snapshotted and reset, and the window is queued only when
//!   it carries data.
//! - **Terminal** (`success`, `failed`, `cancelled`, `terminated`,
//!   `skipped`): the aggregators are read without reset and a final snapshot
//!   is queued unconditionally. The collector then unsubscribes and disposes
//!   its aggregators.
//!
//! ## Key Components
//!
//! - **`IterationWindowCollector`**: the per-iteration subscriber
//! - **`CollectorBuilder`**: validates collaborators and subscribes the collector
//! - **`IterationStatusOracle`**: where the authoritative iteration status comes from
//! - **`StatusBoard`**: an in-memory oracle the execution engine writes to

use crate::aggregators::{IterationAggregators, SnapshotMode, WindowMetrics};
use crate::coordinator::{SubscriptionId, WindowClosed, WindowCoordinator, WindowSubscriber};
use crate::error::WindowError;
use crate::queue::SnapshotQueue;
use crate::snapshot::{
    ExecutionStatus, IterationDescriptor, IterationId, StatusPhase, WindowedIterationSnapshot,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Source of truth for an iteration's execution status
pub trait IterationStatusOracle: Send + Sync {
    fn terminal_status(&self, iteration_id: IterationId) -> anyhow::Result<ExecutionStatus>;
}

/// Run-level metadata stamped onto every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub plan_name: String,
    pub test_start_time: DateTime<Utc>,
}

impl ExecutionContext {
    /// Describe the running test plan
    ///
    /// ## Parameters
    /// - `plan_name`: name copied onto every snapshot
    /// - `test_start_time`: wall-clock start of the whole test
    pub fn new(plan_name: impl Into<String>, test_start_time: DateTime<Utc>) -> Self {
        Self {
            plan_name: plan_name.into(),
            test_start_time,
        }
    }
}

/// Shared, in-memory table of iteration statuses
///
/// Iterations that were never reported are `NotStarted`.
#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: RwLock<HashMap<IterationId, ExecutionStatus>>,
}

impl StatusBoard {
    /// Create an empty board; every iteration starts as `NotStarted`
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status, returning the previous one if any
    pub fn set(&self, iteration_id: IterationId, status: ExecutionStatus) -> Option<ExecutionStatus> {
        self.statuses.write().insert(iteration_id, status)
    }

    /// Current status of an iteration, `NotStarted` when unknown
    pub fn get(&self, iteration_id: IterationId) -> ExecutionStatus {
        self.statuses
            .read()
            .get(&iteration_id)
            .copied()
            .unwrap_or(ExecutionStatus::NotStarted)
    }

    /// Forget an iteration's status
    ///
    /// ## Returns
    ///
    /// The last status recorded, if any.
    pub fn remove(&self, iteration_id: IterationId) -> Option<ExecutionStatus> {
        self.statuses.write().remove(&iteration_id)
    }
}

impl IterationStatusOracle for StatusBoard {
    fn terminal_status(&self, iteration_id: IterationId) -> anyhow::Result<ExecutionStatus> {
        Ok(self.get(iteration_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorState {
    Active,
    Finalized,
}

/// Builder for [`IterationWindowCollector`]
///
/// Every collaborator is required; `build` fails fast when one is missing.
pub struct CollectorBuilder {
    descriptor: IterationDescriptor,
    aggregators: Option<IterationAggregators>,
    queue: Option<Arc<SnapshotQueue>>,
    coordinator: Option<WindowCoordinator>,
    oracle: Option<Arc<dyn IterationStatusOracle>>,
    context: Option<ExecutionContext>,
}

impl CollectorBuilder {
    /// Start a builder for the iteration described by `descriptor`
    pub fn new(descriptor: IterationDescriptor) -> Self {
        Self {
            descriptor,
            aggregators: None,
            queue: None,
            coordinator: None,
            oracle: None,
            context: None,
        }
    }

    /// Aggregators to read; they must belong to the same iteration
    pub fn aggregators(mut self, aggregators: IterationAggregators) -> Self {
        self.aggregators = Some(aggregators);
        self
    }

    /// Queue that receives the assembled snapshots
    pub fn queue(mut self, queue: Arc<SnapshotQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Coordinator the collector subscribes to
    pub fn coordinator(mut self, coordinator: WindowCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Source of the iteration's execution status
    pub fn oracle(mut self, oracle: Arc<dyn IterationStatusOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Plan name and test start time stamped on each snapshot
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Create the collector and subscribe it to the coordinator
    pub fn build(self) -> Result<Arc<IterationWindowCollector>, WindowError> {
        let aggregators = self
            .aggregators
            .ok_or(WindowError::MissingCollaborator("aggregators"))?;
        let queue = self
            .queue
            .ok_or(WindowError::MissingCollaborator("snapshot queue"))?;
        let coordinator = self
            .coordinator
            .ok_or(WindowError::MissingCollaborator("window coordinator"))?;
        let oracle = self
            .oracle
            .ok_or(WindowError::MissingCollaborator("status oracle"))?;
        let context = self
            .context
            .ok_or(WindowError::MissingCollaborator("execution context"))?;

        if aggregators.iteration_id() != self.descriptor.id {
            return Err(WindowError::InvalidConfig(format!(
                "aggregators belong to iteration {} but the collector is for {}",
                aggregators.iteration_id(),
                self.descriptor.id
            )));
        }

        let collector = Arc::new(IterationWindowCollector {
            descriptor: self.descriptor,
            context,
            aggregators,
            queue,
            coordinator: coordinator.clone(),
            oracle,
            state: Mutex::new(CollectorState::Active),
            subscription: Mutex::new(None),
            windows_sent: AtomicU64::new(0),
        });

        // Hold the slot while subscribing so a window delivered before the id
        // is stored cannot release without it.
        {
            let mut slot = collector.subscription.lock();
            let subscriber: Arc<dyn WindowSubscriber> = collector.clone();
            *slot = Some(coordinator.subscribe(subscriber));
        }

        debug!(
            "Collector attached to iteration {} ({}/{})",
            collector.descriptor.id,
            collector.descriptor.round_name,
            collector.descriptor.iteration_name
        );
        Ok(collector)
    }
}

/// Per-iteration window subscriber
pub struct IterationWindowCollector {
    descriptor: IterationDescriptor,
    context: ExecutionContext,
    aggregators: IterationAggregators,
    queue: Arc<SnapshotQueue>,
    coordinator: WindowCoordinator,
    oracle: Arc<dyn IterationStatusOracle>,
    state: Mutex<CollectorState>,
    subscription: Mutex<Option<SubscriptionId>>,
    windows_sent: AtomicU64,
}

impl IterationWindowCollector {
    /// Shorthand for [`CollectorBuilder::new`]
    pub fn builder(descriptor: IterationDescriptor) -> CollectorBuilder {
        CollectorBuilder::new(descriptor)
    }

    /// Id of the iteration this collector windows
    pub fn iteration_id(&self) -> IterationId {
        self.descriptor.id
    }

    /// Static description copied onto each snapshot
    pub fn descriptor(&self) -> &IterationDescriptor {
        &self.descriptor
    }

    /// Handle to the aggregators the execution engine writes into
    pub fn aggregators(&self) -> &IterationAggregators {
        &self.aggregators
    }

    /// True once the final snapshot has been sent or the collector disposed
    pub fn is_finalized(&self) -> bool {
        *self.state.lock() == CollectorState::Finalized
    }

    /// Number of snapshots this collector has queued
    pub fn windows_sent(&self) -> u64 {
        self.windows_sent.load(Ordering::Relaxed)
    }

    /// Stop collecting without sending a final snapshot. Idempotent.
    pub fn dispose(&self) {
        *self.state.lock() = CollectorState::Finalized;
        self.release();
    }

    fn release(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.coordinator.unsubscribe(id);
        }
        self.aggregators.dispose();
    }

    fn assemble(
        &self,
        window: &WindowClosed,
        status: ExecutionStatus,
        is_final: bool,
        metrics: WindowMetrics,
    ) -> WindowedIterationSnapshot {
        WindowedIterationSnapshot {
            iteration_id: self.descriptor.id,
            plan_name: self.context.plan_name.clone(),
            test_start_time: self.context.test_start_time,
            round_name: self.descriptor.round_name.clone(),
            iteration_name: self.descriptor.iteration_name.clone(),
            target_url: self.descriptor.target_url.clone(),
            window_sequence: window.sequence,
            window_start: window.window_start,
            window_end: window.window_end,
            execution_status: status,
            is_final,
            duration: metrics.duration,
            throughput: metrics.throughput,
            response_codes: metrics.response_codes,
            data_transmission: metrics.data_transmission,
        }
    }

    fn push(&self, snapshot: WindowedIterationSnapshot) {
        trace!(
            "Queueing window {} for iteration {} (final: {})",
            snapshot.window_sequence,
            snapshot.iteration_id,
            snapshot.is_final
        );
        self.queue.enqueue(snapshot);
        self.windows_sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl WindowSubscriber for IterationWindowCollector {
    fn on_window_closed(&self, window: &WindowClosed) -> anyhow::Result<()> {
        // Held for the whole window so only one caller can ever finalize.
        let mut state = self.state.lock();
        if *state == CollectorState::Finalized {
            return Ok(());
        }

        let status = self
            .oracle
            .terminal_status(self.descriptor.id)
            .with_context(|| format!("Failed to query status of iteration {}", self.descriptor.id))?;

        match status.phase() {
            // Data written early is held for the first active window, but
            // its rates cover that window only.
            StatusPhase::Pending => self.aggregators.restart_window(),
            StatusPhase::Active => {
                let metrics = self.aggregators.collect(SnapshotMode::Reset);
                if metrics.has_data() {
                    self.push(self.assemble(window, status, false, metrics));
                }
            }
            StatusPhase::Terminal => {
                let metrics = self.aggregators.collect(SnapshotMode::Retain);
                self.push(self.assemble(window, status, true, metrics));
                *state = CollectorState::Finalized;
                drop(state);

                self.release();
                debug!(
                    "Iteration {} finished with status {}, collector released after {} windows",
                    self.descriptor.id,
                    status,
                    self.windows_sent()
                );
            }
        }

        Ok(())
    }

    fn on_coordinator_stopped(&self) {
        self.dispose();
    }
}

impl std::fmt::Debug for IterationWindowCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationWindowCollector")
            .field("iteration_id", &self.descriptor.id)
            .field("round_name", &self.descriptor.round_name)
            .field("finalized", &self.is_finalized())
            .field("windows_sent", &self.windows_sent())
            .finish()
    }
}
