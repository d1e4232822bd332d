//! # Snapshot Data Model
//!
//! Shared, immutable value types produced by the windowed aggregators and
//! pushed downstream by the iteration collectors.
//!
//! ## Key Types
//!
//! - **IterationId / IterationDescriptor**: identity of one executing iteration
//! - **ExecutionStatus**: the authoritative lifecycle state reported by the
//!   iteration-status oracle
//! - **Metric blocks**: `DurationMetric`, `ThroughputMetric`,
//!   `ResponseCodeMetric`, `DataTransmissionMetric`
//! - **WindowedIterationSnapshot**: the unit pushed through the snapshot queue
//!
//! Every metric block is optional on the snapshot. An aggregator that saw no
//! meaningful data for a window yields `None` instead of a zero-filled block,
//! and `has_data()` is derived from which blocks are present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one executing iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationId(Uuid);

impl IterationId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IterationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for IterationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of an iteration, copied onto every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationDescriptor {
    pub id: IterationId,
    pub round_name: String,
    pub iteration_name: String,
    pub target_url: String,
}

impl IterationDescriptor {
    /// Describe a new iteration with a fresh id
    pub fn new(
        round_name: impl Into<String>,
        iteration_name: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            id: IterationId::new(),
            round_name: round_name.into(),
            iteration_name: iteration_name.into(),
            target_url: target_url.into(),
        }
    }
}

/// Lifecycle state of an iteration as reported by the status oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotStarted,
    Scheduled,
    Ongoing,
    OngoingScheduled,
    PartiallySkipped,
    Success,
    Failed,
    Cancelled,
    Terminated,
    Skipped,
}

/// Coarse grouping of [`ExecutionStatus`] that drives collector behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPhase {
    /// Nothing has run yet; there is no data to report
    Pending,
    /// Requests are in flight; windows are snapshotted and reset
    Active,
    /// No further transitions will happen; the last window is flushed
    Terminal,
}

impl ExecutionStatus {
    /// Group the status into the phase that decides collector behaviour
    pub fn phase(self) -> StatusPhase {
        match self {
            ExecutionStatus::NotStarted | ExecutionStatus::Scheduled => StatusPhase::Pending,
            ExecutionStatus::Ongoing
            | ExecutionStatus::OngoingScheduled
            | ExecutionStatus::PartiallySkipped => StatusPhase::Active,
            ExecutionStatus::Success
            | ExecutionStatus::Failed
            | ExecutionStatus::Cancelled
            | ExecutionStatus::Terminated
            | ExecutionStatus::Skipped => StatusPhase::Terminal,
        }
    }

    /// True when no further transitions can happen
    pub fn is_terminal(self) -> bool {
        self.phase() == StatusPhase::Terminal
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::NotStarted => "Not Started",
            ExecutionStatus::Scheduled => "Scheduled",
            ExecutionStatus::Ongoing => "Ongoing",
            ExecutionStatus::OngoingScheduled => "Ongoing (Scheduled)",
            ExecutionStatus::PartiallySkipped => "Partially Skipped",
            ExecutionStatus::Success => "Success",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
            ExecutionStatus::Terminated => "Terminated",
            ExecutionStatus::Skipped => "Skipped",
        };
        write!(f, "{}", name)
    }
}

/// Summary statistics for one timing series, in milliseconds
///
/// When `count` is zero every field is zero. Percentiles only reflect
/// non-zero samples, since a zero duration means the phase was not measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingMetric {
    pub count: u64,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TimingMetric {
    /// True when at least one sample was recorded
    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Per-phase request timings for one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationMetric {
    pub total_time: TimingMetric,
    pub tcp_handshake_time: TimingMetric,
    pub tls_handshake_time: TimingMetric,
    pub request_sent_time: TimingMetric,
    pub time_to_first_byte: TimingMetric,
    pub content_transfer_time: TimingMetric,
}

impl DurationMetric {
    /// True when any phase recorded a sample
    pub fn has_data(&self) -> bool {
        [
            &self.total_time,
            &self.tcp_handshake_time,
            &self.tls_handshake_time,
            &self.request_sent_time,
            &self.time_to_first_byte,
            &self.content_transfer_time,
        ]
        .iter()
        .any(|m| m.has_data())
    }
}

/// Request counts and rates for one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetric {
    pub requests_count: u64,
    pub successful_request_count: u64,
    pub failed_requests_count: u64,
    pub max_concurrent_requests: u64,
    pub requests_per_second: f64,
    /// Percentage of failed requests, 0-100
    pub error_rate: f64,
}

impl ThroughputMetric {
    /// Requests completed, or a peak concurrency above zero
    pub fn has_data(&self) -> bool {
        self.requests_count > 0 || self.max_concurrent_requests > 0
    }
}

/// Count of responses observed for one status code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCodeEntry {
    pub status_code: u16,
    pub reason: String,
    pub count: u64,
}

/// Distinct status codes observed in one window, ordered by status code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCodeMetric {
    pub entries: Vec<ResponseCodeEntry>,
}

impl ResponseCodeMetric {
    /// True when at least one status code was seen
    pub fn has_data(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Responses seen for `status_code`, zero when absent
    pub fn count_for(&self, status_code: u16) -> u64 {
        self.entries
            .iter()
            .find(|e| e.status_code == status_code)
            .map_or(0, |e| e.count)
    }

    /// Responses seen across all status codes
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }
}

/// Bytes moved during one window and the derived bandwidth
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTransmissionMetric {
    pub data_sent: u64,
    pub data_received: u64,
    pub upstream_throughput_bps: f64,
    pub downstream_throughput_bps: f64,
    pub throughput_bps: f64,
}

impl DataTransmissionMetric {
    /// True when any bytes moved in either direction
    pub fn has_data(&self) -> bool {
        self.data_sent > 0 || self.data_received > 0
    }
}

/// One closed window of metrics for one iteration
///
/// This is the unit that flows through the snapshot queue into the store and
/// on to external consumers. Serialization is provided for convenience; the
/// encoded form carries no stability guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedIterationSnapshot {
    pub iteration_id: IterationId,
    pub plan_name: String,
    pub test_start_time: DateTime<Utc>,
    pub round_name: String,
    pub iteration_name: String,
    pub target_url: String,
    pub window_sequence: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub execution_status: ExecutionStatus,
    pub is_final: bool,
    pub duration: Option<DurationMetric>,
    pub throughput: Option<ThroughputMetric>,
    pub response_codes: Option<ResponseCodeMetric>,
    pub data_transmission: Option<DataTransmissionMetric>,
}

impl WindowedIterationSnapshot {
    /// True when at least one metric block is present
    pub fn has_data(&self) -> bool {
        self.duration.is_some()
            || self.throughput.is_some()
            || self.response_codes.is_some()
            || self.data_transmission.is_some()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A minimal snapshot with no metric blocks, for queue and store tests
    pub fn empty_snapshot(iteration_id: IterationId, sequence: u64) -> WindowedIterationSnapshot {
        let now = Utc::now();
        WindowedIterationSnapshot {
            iteration_id,
            plan_name: "plan".to_string(),
            test_start_time: now,
            round_name: "round-1".to_string(),
            iteration_name: "iteration-1".to_string(),
            target_url: "http://localhost:8080/".to_string(),
            window_sequence: sequence,
            window_start: now,
            window_end: now,
            execution_status: ExecutionStatus::Ongoing,
            is_final: false,
            duration: None,
            throughput: None,
            response_codes: None,
            data_transmission: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::empty_snapshot;
    use super::*;

    #[test]
    fn test_status_phases() {
        assert_eq!(ExecutionStatus::NotStarted.phase(), StatusPhase::Pending);
        assert_eq!(ExecutionStatus::Scheduled.phase(), StatusPhase::Pending);
        assert_eq!(ExecutionStatus::Ongoing.phase(), StatusPhase::Active);
        assert_eq!(ExecutionStatus::OngoingScheduled.phase(), StatusPhase::Active);
        assert_eq!(ExecutionStatus::PartiallySkipped.phase(), StatusPhase::Active);
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Terminated,
            ExecutionStatus::Skipped,
        ] {
            assert!(status.is_terminal(), "{} should be terminal", status);
        }
    }

    #[test]
    fn test_snapshot_has_data_follows_blocks() {
        let mut snapshot = empty_snapshot(IterationId::new(), 1);
        assert!(!snapshot.has_data());

        snapshot.response_codes = Some(ResponseCodeMetric {
            entries: vec![ResponseCodeEntry {
                status_code: 200,
                reason: "OK".to_string(),
                count: 3,
            }],
        });
        assert!(snapshot.has_data());
    }

    #[test]
    fn test_response_code_lookup() {
        let metric = ResponseCodeMetric {
            entries: vec![
                ResponseCodeEntry {
                    status_code: 200,
                    reason: "OK".to_string(),
                    count: 7,
                },
                ResponseCodeEntry {
                    status_code: 503,
                    reason: "Service Unavailable".to_string(),
                    count: 2,
                },
            ],
        };
        assert_eq!(metric.count_for(200), 7);
        assert_eq!(metric.count_for(404), 0);
        assert_eq!(metric.total(), 9);
    }

    #[test]
    fn test_snapshot_serializes_status_in_snake_case() {
        let mut snapshot = empty_snapshot(IterationId::new(), 4);
        snapshot.execution_status = ExecutionStatus::OngoingScheduled;
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["execution_status"], "ongoing_scheduled");
        assert_eq!(json["window_sequence"], 4);
        assert!(json["duration"].is_null());
    }
}
