//! HTTP response code aggregation.

use super::{AggregatorCore, SnapshotMode, WindowState, WindowedAggregator};
use crate::snapshot::{IterationId, ResponseCodeEntry, ResponseCodeMetric};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

#[derive(Default)]
struct ResponseCodeState {
    // Keyed by status code so the output comes out ordered.
    codes: BTreeMap<u16, (String, u64)>,
}

impl WindowState for ResponseCodeState {
    type Output = ResponseCodeMetric;

    fn build(&self, _now: Instant) -> Option<ResponseCodeMetric> {
        if self.codes.is_empty() {
            return None;
        }

        let entries = self
            .codes
            .iter()
            .map(|(&status_code, (reason, count))| ResponseCodeEntry {
                status_code,
                reason: reason.clone(),
                count: *count,
            })
            .collect();

        Some(ResponseCodeMetric { entries })
    }

    fn reset(&mut self, _now: Instant) {
        self.codes.clear();
    }
}

/// Per-status-code response counter for one iteration
#[derive(Debug)]
pub struct ResponseCodeAggregator {
    core: AggregatorCore<ResponseCodeState>,
}

impl ResponseCodeAggregator {
    /// Create an aggregator with no codes recorded
    pub fn new(iteration_id: IterationId, round_name: &str) -> Self {
        Self {
            core: AggregatorCore::new(
                iteration_id,
                round_name.to_string(),
                ResponseCodeState::default(),
            ),
        }
    }

    /// Count one response. The first reason phrase seen for a code in a
    /// window is the one reported.
    pub fn update_response_code(&self, status_code: u16, reason: &str) {
        self.core.update(|state| {
            state
                .codes
                .entry(status_code)
                .or_insert_with(|| (reason.to_string(), 0))
                .1 += 1;
        });
    }
}

impl WindowedAggregator for ResponseCodeAggregator {
    type Output = ResponseCodeMetric;

    fn kind(&self) -> &'static str {
        "ResponseCodeAggregator"
    }

    fn iteration_id(&self) -> IterationId {
        self.core.iteration_id()
    }

    fn round_name(&self) -> &str {
        self.core.round_name()
    }

    fn snapshot_and_reset(&self) -> Option<ResponseCodeMetric> {
        self.core.take(SnapshotMode::Reset, Instant::now())
    }

    fn snapshot_without_reset(&self) -> Option<ResponseCodeMetric> {
        self.core.take(SnapshotMode::Retain, Instant::now())
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl fmt::Display for ResponseCodeAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_labelled(self.kind(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_ordered_and_counted() {
        let agg = ResponseCodeAggregator::new(IterationId::new(), "round-1");
        agg.update_response_code(503, "Service Unavailable");
        agg.update_response_code(200, "OK");
        agg.update_response_code(404, "Not Found");
        agg.update_response_code(200, "OK");

        let metric = agg.snapshot_and_reset().unwrap();
        let codes: Vec<u16> = metric.entries.iter().map(|e| e.status_code).collect();
        assert_eq!(codes, vec![200, 404, 503]);
        assert_eq!(metric.count_for(200), 2);
        assert_eq!(metric.entries[2].reason, "Service Unavailable");
    }

    #[test]
    fn test_first_reason_wins_within_window() {
        let agg = ResponseCodeAggregator::new(IterationId::new(), "round-1");
        agg.update_response_code(200, "OK");
        agg.update_response_code(200, "Fine");

        let metric = agg.snapshot_and_reset().unwrap();
        assert_eq!(metric.entries.len(), 1);
        assert_eq!(metric.entries[0].reason, "OK");
        assert_eq!(metric.entries[0].count, 2);
    }

    #[test]
    fn test_reset_clears_codes() {
        let agg = ResponseCodeAggregator::new(IterationId::new(), "round-1");
        agg.update_response_code(201, "Created");
        assert!(agg.snapshot_and_reset().is_some());
        assert!(agg.snapshot_and_reset().is_none());
    }

    #[test]
    fn test_without_reset_accumulates_across_reads() {
        let agg = ResponseCodeAggregator::new(IterationId::new(), "round-1");
        agg.update_response_code(200, "OK");
        assert_eq!(agg.snapshot_without_reset().unwrap().total(), 1);
        agg.update_response_code(200, "OK");
        assert_eq!(agg.snapshot_without_reset().unwrap().total(), 2);
    }
}
