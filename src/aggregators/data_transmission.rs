//! Data transmission aggregation: bytes sent and received per window and the
//! bandwidth they imply over the window's elapsed time.

use super::{elapsed_secs, AggregatorCore, SnapshotMode, WindowState, WindowedAggregator};
use crate::snapshot::{DataTransmissionMetric, IterationId};
use std::fmt;
use std::time::Instant;

struct DataTransmissionState {
    window_started: Instant,
    data_sent: u64,
    data_received: u64,
}

impl WindowState for DataTransmissionState {
    type Output = DataTransmissionMetric;

    fn build(&self, now: Instant) -> Option<DataTransmissionMetric> {
        if self.data_sent == 0 && self.data_received == 0 {
            return None;
        }

        let secs = elapsed_secs(self.window_started, now);
        Some(DataTransmissionMetric {
            data_sent: self.data_sent,
            data_received: self.data_received,
            upstream_throughput_bps: self.data_sent as f64 / secs,
            downstream_throughput_bps: self.data_received as f64 / secs,
            throughput_bps: self.data_sent.saturating_add(self.data_received) as f64 / secs,
        })
    }

    fn reset(&mut self, now: Instant) {
        self.window_started = now;
        self.data_sent = 0;
        self.data_received = 0;
    }

    fn restart_window(&mut self, now: Instant) {
        self.window_started = now;
    }
}

/// Byte counter for one iteration
#[derive(Debug)]
pub struct DataTransmissionAggregator {
    core: AggregatorCore<DataTransmissionState>,
}

impl DataTransmissionAggregator {
    /// Create an aggregator whose first window starts now
    pub fn new(iteration_id: IterationId, round_name: &str) -> Self {
        Self {
            core: AggregatorCore::new(
                iteration_id,
                round_name.to_string(),
                DataTransmissionState {
                    window_started: Instant::now(),
                    data_sent: 0,
                    data_received: 0,
                },
            ),
        }
    }

    /// Add bytes written to the target
    pub fn update_data_sent(&self, bytes: u64) {
        self.core
            .update(|state| state.data_sent = state.data_sent.saturating_add(bytes));
    }

    /// Add bytes read from the target
    pub fn update_data_received(&self, bytes: u64) {
        self.core
            .update(|state| state.data_received = state.data_received.saturating_add(bytes));
    }

    pub(crate) fn take_at(
        &self,
        mode: SnapshotMode,
        now: Instant,
    ) -> Option<DataTransmissionMetric> {
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

impl WindowedAggregator for DataTransmissionAggregator {
    type Output = DataTransmissionMetric;

    fn kind(&self) -> &'static str {
        "DataTransmissionAggregator"
    }

    fn iteration_id(&self) -> IterationId {
        self.core.iteration_id()
    }

    fn round_name(&self) -> &str {
        self.core.round_name()
    }

    fn snapshot_and_reset(&self) -> Option<DataTransmissionMetric> {
        self.take_at(SnapshotMode::Reset, Instant::now())
    }

    fn snapshot_without_reset(&self) -> Option<DataTransmissionMetric> {
        self.take_at(SnapshotMode::Retain, Instant::now())
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl fmt::Display for DataTransmissionAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_labelled(self.kind(), f)
    }
}
