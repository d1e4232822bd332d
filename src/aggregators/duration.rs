//! Request duration aggregation, one timing series per request phase.

use super::{AggregatorCore, SnapshotMode, WindowState, WindowedAggregator};
use crate::error::WindowError;
use crate::metrics::TimingAccumulator;
use crate::snapshot::{DurationMetric, IterationId};
use std::fmt;
use std::time::Instant;

/// Phases of an HTTP request that are timed separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPhase {
    Total,
    TcpHandshake,
    TlsHandshake,
    RequestSent,
    TimeToFirstByte,
    ContentTransfer,
}

struct DurationState {
    total_time: TimingAccumulator,
    tcp_handshake_time: TimingAccumulator,
    tls_handshake_time: TimingAccumulator,
    request_sent_time: TimingAccumulator,
    time_to_first_byte: TimingAccumulator,
    content_transfer_time: TimingAccumulator,
}

impl DurationState {
    fn new() -> Result<Self, WindowError> {
        Ok(Self {
            total_time: TimingAccumulator::new()?,
            tcp_handshake_time: TimingAccumulator::new()?,
            tls_handshake_time: TimingAccumulator::new()?,
            request_sent_time: TimingAccumulator::new()?,
            time_to_first_byte: TimingAccumulator::new()?,
            content_transfer_time: TimingAccumulator::new()?,
        })
    }

    fn accumulator(&mut self, phase: DurationPhase) -> &mut TimingAccumulator {
        match phase {
            DurationPhase::Total => &mut self.total_time,
            DurationPhase::TcpHandshake => &mut self.tcp_handshake_time,
            DurationPhase::TlsHandshake => &mut self.tls_handshake_time,
            DurationPhase::RequestSent => &mut self.request_sent_time,
            DurationPhase::TimeToFirstByte => &mut self.time_to_first_byte,
            DurationPhase::ContentTransfer => &mut self.content_transfer_time,
        }
    }
}

impl WindowState for DurationState {
    type Output = DurationMetric;

    fn build(&self, _now: Instant) -> Option<DurationMetric> {
        let metric = DurationMetric {
            total_time: self.total_time.to_metric(),
            tcp_handshake_time: self.tcp_handshake_time.to_metric(),
            tls_handshake_time: self.tls_handshake_time.to_metric(),
            request_sent_time: self.request_sent_time.to_metric(),
            time_to_first_byte: self.time_to_first_byte.to_metric(),
            content_transfer_time: self.content_transfer_time.to_metric(),
        };
        metric.has_data().then_some(metric)
    }

    fn reset(&mut self, _now: Instant) {
        self.total_time.reset();
        self.tcp_handshake_time.reset();
        self.tls_handshake_time.reset();
        self.request_sent_time.reset();
        self.time_to_first_byte.reset();
        self.content_transfer_time.reset();
    }
}

/// Per-phase request timing aggregator for one iteration
#[derive(Debug)]
pub struct DurationAggregator {
    core: AggregatorCore<DurationState>,
}

impl DurationAggregator {
    /// Create one timing accumulator per phase
    ///
    /// ## Returns
    ///
    /// `WindowError::Histogram` if a histogram cannot be allocated.
    pub fn new(iteration_id: IterationId, round_name: &str) -> Result<Self, WindowError> {
        Ok(Self {
            core: AggregatorCore::new(iteration_id, round_name.to_string(), DurationState::new()?),
        })
    }

    /// Record a duration in milliseconds for the given phase
    pub fn update(&self, phase: DurationPhase, value_ms: f64) {
        self.core.update(|state| state.accumulator(phase).record(value_ms));
    }

    /// Record a full request duration in milliseconds
    pub fn update_total_time(&self, value_ms: f64) {
        self.update(DurationPhase::Total, value_ms);
    }

    /// Record TCP connect time in milliseconds
    pub fn update_tcp_handshake_time(&self, value_ms: f64) {
        self.update(DurationPhase::TcpHandshake, value_ms);
    }

    /// Record TLS handshake time in milliseconds
    pub fn update_tls_handshake_time(&self, value_ms: f64) {
        self.update(DurationPhase::TlsHandshake, value_ms);
    }

    /// Record time spent writing the request, in milliseconds
    pub fn update_request_sent_time(&self, value_ms: f64) {
        self.update(DurationPhase::RequestSent, value_ms);
    }

    /// Record time until the first response byte, in milliseconds
    pub fn update_time_to_first_byte(&self, value_ms: f64) {
        self.update(DurationPhase::TimeToFirstByte, value_ms);
    }

    /// Record response body transfer time in milliseconds
    pub fn update_content_transfer_time(&self, value_ms: f64) {
        self.update(DurationPhase::ContentTransfer, value_ms);
    }
}

impl WindowedAggregator for DurationAggregator {
    type Output = DurationMetric;

    fn kind(&self) -> &'static str {
        "DurationAggregator"
    }

    fn iteration_id(&self) -> IterationId {
        self.core.iteration_id()
    }

    fn round_name(&self) -> &str {
        self.core.round_name()
    }

    fn snapshot_and_reset(&self) -> Option<DurationMetric> {
        self.core.take(SnapshotMode::Reset, Instant::now())
    }

    fn snapshot_without_reset(&self) -> Option<DurationMetric> {
        self.core.take(SnapshotMode::Retain, Instant::now())
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl fmt::Display for DurationAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_labelled(self.kind(), f)
    }
}
