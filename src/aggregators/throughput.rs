//! Request throughput aggregation: completed request counts, error rate,
//! request rate and peak concurrency per window.
//!
//! The in-flight counter is live state, not window state: it tracks requests
//! that are still running and is never cleared on reset. Only the window's
//! peak is reset, and it restarts from the number of requests in flight at
//! that moment, since those requests are concurrent in the new window too.

use super::{elapsed_secs, AggregatorCore, SnapshotMode, WindowState, WindowedAggregator};
use crate::snapshot::{IterationId, ThroughputMetric};
use std::fmt;
use std::time::Instant;

/// How a completed request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

struct ThroughputState {
    window_started: Instant,
    requests_count: u64,
    successful_request_count: u64,
    failed_requests_count: u64,
    in_flight: u64,
    window_max_concurrent: u64,
}

impl ThroughputState {
    fn new(now: Instant) -> Self {
        Self {
            window_started: now,
            requests_count: 0,
            successful_request_count: 0,
            failed_requests_count: 0,
            in_flight: 0,
            window_max_concurrent: 0,
        }
    }
}

impl WindowState for ThroughputState {
    type Output = ThroughputMetric;

    fn build(&self, now: Instant) -> Option<ThroughputMetric> {
        let error_rate = if self.requests_count > 0 {
            self.failed_requests_count as f64 / self.requests_count as f64 * 100.0
        } else {
            0.0
        };

        let metric = ThroughputMetric {
            requests_count: self.requests_count,
            successful_request_count: self.successful_request_count,
            failed_requests_count: self.failed_requests_count,
            max_concurrent_requests: self.window_max_concurrent,
            requests_per_second: self.requests_count as f64
                / elapsed_secs(self.window_started, now),
            error_rate,
        };
        metric.has_data().then_some(metric)
    }

    fn reset(&mut self, now: Instant) {
        self.window_started = now;
        self.requests_count = 0;
        self.successful_request_count = 0;
        self.failed_requests_count = 0;
        self.window_max_concurrent = self.in_flight;
    }

    fn restart_window(&mut self, now: Instant) {
        self.window_started = now;
    }
}

/// Request throughput aggregator for one iteration
#[derive(Debug)]
pub struct ThroughputAggregator {
    core: AggregatorCore<ThroughputState>,
}

impl ThroughputAggregator {
    /// Create an aggregator whose first window starts now
    pub fn new(iteration_id: IterationId, round_name: &str) -> Self {
        Self {
            core: AggregatorCore::new(
                iteration_id,
                round_name.to_string(),
                ThroughputState::new(Instant::now()),
            ),
        }
    }

    /// A request has started
    pub fn increase_connections_count(&self) {
        self.core.update(|state| {
            state.in_flight += 1;
            state.window_max_concurrent = state.window_max_concurrent.max(state.in_flight);
        });
    }

    /// A request has completed with the given outcome
    pub fn decrease_connections_count(&self, outcome: RequestOutcome) {
        self.core.update(|state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.requests_count += 1;
            match outcome {
                RequestOutcome::Success => state.successful_request_count += 1,
                RequestOutcome::Failure => state.failed_requests_count += 1,
            }
        });
    }

    /// Requests currently in flight
    pub fn in_flight(&self) -> u64 {
        self.core.read(|state| state.in_flight)
    }

    pub(crate) fn take_at(&self, mode: SnapshotMode, now: Instant) -> Option<ThroughputMetric> {
        self.core.take(mode, now)
    }

    pub(crate) fn restart_window_at(&self, now: Instant) {
        self.core.restart_window(now);
    }

    #[cfg(test)]
    fn window_started(&self) -> Instant {
        self.core.read(|state| state.window_started)
    }
}

impl WindowedAggregator for ThroughputAggregator {
    type Output = ThroughputMetric;

    fn kind(&self) -> &'static str {
        "ThroughputAggregator"
    }

    fn iteration_id(&self) -> IterationId {
        self.core.iteration_id()
    }

    fn round_name(&self) -> &str {
        self.core.round_name()
    }

    fn snapshot_and_reset(&self) -> Option<ThroughputMetric> {
        self.take_at(SnapshotMode::Reset, Instant::now())
    }

    fn snapshot_without_reset(&self) -> Option<ThroughputMetric> {
        self.take_at(SnapshotMode::Retain, Instant::now())
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl fmt::Display for ThroughputAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_labelled(self.kind(), f)
    }
}
