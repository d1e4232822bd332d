//! # Windowed Metric Aggregators
//!
//! One aggregator per metric family per iteration. The execution engine calls
//! the write methods from many tasks at once; the iteration collector reads
//! (and usually resets) each aggregator once per window.
//!
//! ## Key Components
//!
//! - **DurationAggregator**: per-phase request timings
//! - **ThroughputAggregator**: request counts, error rate and peak concurrency
//! - **ResponseCodeAggregator**: counts per HTTP status code
//! - **DataTransmissionAggregator**: bytes sent/received and bandwidth
//! - **IterationAggregators**: the bundle of all four owned by one iteration
//!
//! ## Locking
//!
//! Every aggregator guards its state with its own `parking_lot::Mutex`. Write
//! methods and snapshots take that lock for a handful of arithmetic updates
//! and never perform I/O or take a second lock while holding it. A snapshot
//! with reset runs entirely under the lock, so each update lands either in the
//! window being closed or in the next one, never split between them.
//!
//! There is no lock spanning several aggregators; the four blocks of one
//! window snapshot may be cut a few microseconds apart.

use crate::error::WindowError;
use crate::snapshot::{
    DataTransmissionMetric, DurationMetric, IterationId, ResponseCodeMetric, ThroughputMetric,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub mod data_transmission;
pub mod duration;
pub mod response_code;
pub mod throughput;

pub use data_transmission::DataTransmissionAggregator;
pub use duration::{DurationAggregator, DurationPhase};
pub use response_code::ResponseCodeAggregator;
pub use throughput::{RequestOutcome, ThroughputAggregator};

/// Shortest window used when deriving per-second rates
pub(crate) const MIN_ELAPSED_SECS: f64 = 0.001;

/// Elapsed seconds between two instants, floored to avoid dividing by zero
pub(crate) fn elapsed_secs(since: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(since)
        .as_secs_f64()
        .max(MIN_ELAPSED_SECS)
}

/// How a snapshot treats the accumulated state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Read, then reset for the next window
    Reset,
    /// Read only; used for the final window of an iteration
    Retain,
}

/// Push-only access to a windowed aggregator
///
/// Snapshots return `None` when the window carried no meaningful data or when
/// the aggregator has been disposed.
pub trait WindowedAggregator: Send + Sync {
    type Output;

    /// Type name used in diagnostics
    fn kind(&self) -> &'static str;

    fn iteration_id(&self) -> IterationId;

    fn round_name(&self) -> &str;

    /// Build the current window's block and reset the state atomically
    fn snapshot_and_reset(&self) -> Option<Self::Output>;

    /// Build the current window's block without resetting
    fn snapshot_without_reset(&self) -> Option<Self::Output>;

    /// Release the aggregator. Idempotent; later snapshots return `None`.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    fn snapshot(&self, mode: SnapshotMode) -> Option<Self::Output> {
        match mode {
            SnapshotMode::Reset => self.snapshot_and_reset(),
            SnapshotMode::Retain => self.snapshot_without_reset(),
        }
    }

    /// General-purpose pull access is not available on windowed aggregators.
    fn current_snapshot(&self) -> Result<Self::Output, WindowError> {
        Err(WindowError::UnsupportedOperation {
            aggregator: self.kind(),
            operation: "current_snapshot",
        })
    }
}

/// Mutable window state of one aggregator kind
pub(crate) trait WindowState: Send {
    type Output;

    /// Build the output block as of `now`; `None` when there is nothing to report
    fn build(&self, now: Instant) -> Option<Self::Output>;

    /// Start a new window at `now`
    fn reset(&mut self, now: Instant);

    /// Move the rate clock to `now` without touching any counters
    ///
    /// Only kinds that derive per-second rates keep a clock.
    fn restart_window(&mut self, _now: Instant) {}
}

struct Guarded<S> {
    state: S,
    disposed: bool,
}

/// Identity plus lock-protected state shared by all aggregator kinds
pub(crate) struct AggregatorCore<S> {
    iteration_id: IterationId,
    round_name: String,
    inner: Mutex<Guarded<S>>,
}

impl<S: WindowState> AggregatorCore<S> {
    pub(crate) fn new(iteration_id: IterationId, round_name: String, state: S) -> Self {
        Self {
            iteration_id,
            round_name,
            inner: Mutex::new(Guarded {
                state,
                disposed: false,
            }),
        }
    }

    pub(crate) fn iteration_id(&self) -> IterationId {
        self.iteration_id
    }

    pub(crate) fn round_name(&self) -> &str {
        &self.round_name
    }

    /// Apply a write under the lock. Writes after disposal are dropped.
    #[inline]
    pub(crate) fn update(&self, f: impl FnOnce(&mut S)) {
        let mut guard = self.inner.lock();
        if guard.disposed {
            return;
        }
        f(&mut guard.state);
    }

    pub(crate) fn take(&self, mode: SnapshotMode, now: Instant) -> Option<S::Output> {
        let mut guard = self.inner.lock();
        if guard.disposed {
            return None;
        }
        let output = guard.state.build(now);
        if mode == SnapshotMode::Reset {
            guard.state.reset(now);
        }
        output
    }

    /// Restart the window clock while keeping accumulated data
    pub(crate) fn restart_window(&self, now: Instant) {
        let mut guard = self.inner.lock();
        if !guard.disposed {
            guard.state.restart_window(now);
        }
    }

    /// Read a value out of the state without building a snapshot
    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.lock().state)
    }

    pub(crate) fn dispose(&self) {
        self.inner.lock().disposed = true;
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub(crate) fn fmt_labelled(&self, kind: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(round={}, iteration={})",
            kind, self.round_name, self.iteration_id
        )
    }
}

impl<S> fmt::Debug for AggregatorCore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorCore")
            .field("iteration_id", &self.iteration_id)
            .field("round_name", &self.round_name)
            .finish_non_exhaustive()
    }
}

/// The metric blocks read from one iteration's aggregators for one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetrics {
    pub duration: Option<DurationMetric>,
    pub throughput: Option<ThroughputMetric>,
    pub response_codes: Option<ResponseCodeMetric>,
    pub data_transmission: Option<DataTransmissionMetric>,
}

impl WindowMetrics {
    /// True when any of the four blocks is present
    pub fn has_data(&self) -> bool {
        self.duration.is_some()
            || self.throughput.is_some()
            || self.response_codes.is_some()
            || self.data_transmission.is_some()
    }
}

/// The four aggregators owned by one iteration
///
/// Cloning is cheap and shares the underlying aggregators: the execution
/// engine keeps one clone for its update calls while the collector keeps
/// another for windowing.
#[derive(Debug, Clone)]
pub struct IterationAggregators {
    pub duration: Arc<DurationAggregator>,
    pub throughput: Arc<ThroughputAggregator>,
    pub response_codes: Arc<ResponseCodeAggregator>,
    pub data_transmission: Arc<DataTransmissionAggregator>,
}

impl IterationAggregators {
    /// Create all four aggregators for one iteration
    ///
    /// ## Parameters
    /// - `iteration_id`: iteration the aggregators belong to
    /// - `round_name`: label used in diagnostics
    ///
    /// ## Returns
    ///
    /// `WindowError::Histogram` if the duration histograms cannot be allocated.
    pub fn new(iteration_id: IterationId, round_name: &str) -> Result<Self, WindowError> {
        Ok(Self {
            duration: Arc::new(DurationAggregator::new(iteration_id, round_name)?),
            throughput: Arc::new(ThroughputAggregator::new(iteration_id, round_name)),
            response_codes: Arc::new(ResponseCodeAggregator::new(iteration_id, round_name)),
            data_transmission: Arc::new(DataTransmissionAggregator::new(iteration_id, round_name)),
        })
    }

    /// Iteration all four aggregators belong to
    pub fn iteration_id(&self) -> IterationId {
        self.duration.iteration_id()
    }

    /// Snapshot all four aggregators in the given mode
    pub fn collect(&self, mode: SnapshotMode) -> WindowMetrics {
        WindowMetrics {
            duration: self.duration.snapshot(mode),
            throughput: self.throughput.snapshot(mode),
            response_codes: self.response_codes.snapshot(mode),
            data_transmission: self.data_transmission.snapshot(mode),
        }
    }

    /// Dispose all four aggregators. Idempotent.
    pub fn dispose(&self) {
        self.duration.dispose();
        self.throughput.dispose();
        self.response_codes.dispose();
        self.data_transmission.dispose();
    }

    /// Restart the rate clocks of the bundle without reading or clearing data
    ///
    /// Called for windows the iteration is not yet active in, so that the
    /// first active window's rates are computed over that window alone.
    pub fn restart_window(&self) {
        let now = Instant::now();
        self.throughput.restart_window_at(now);
        self.data_transmission.restart_window_at(now);
    }

    /// True once every aggregator has been disposed
    pub fn is_disposed(&self) -> bool {
        self.duration.is_disposed()
            && self.throughput.is_disposed()
            && self.response_codes.is_disposed()
            && self.data_transmission.is_disposed()
    }
}
