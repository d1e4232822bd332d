//! # Timing Accumulation
//!
//! Running statistics for a single timing series, backed by an HDR histogram
//! for percentile estimation.
//!
//! Count, sum, min and max cover every recorded sample. The histogram only
//! sees samples greater than zero: a zero duration means the phase was not
//! measured for that request (for example, no TLS handshake on a plaintext
//! connection), so it must not drag the percentiles down.

use crate::error::WindowError;
use crate::snapshot::TimingMetric;
use hdrhistogram::Histogram;

/// Smallest value the histogram tracks, in milliseconds
pub const HISTOGRAM_LOWEST_MS: u64 = 1;

/// Largest value the histogram tracks, in milliseconds (~16.7 minutes)
pub const HISTOGRAM_HIGHEST_MS: u64 = 1_000_000;

/// Significant figures kept by the histogram
pub const HISTOGRAM_SIGFIGS: u8 = 3;

/// Running statistics plus a quantile histogram for one timing series
#[derive(Clone)]
pub struct TimingAccumulator {
    histogram: Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TimingAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Result<Self, WindowError> {
        let histogram = Histogram::<u64>::new_with_bounds(
            HISTOGRAM_LOWEST_MS,
            HISTOGRAM_HIGHEST_MS,
            HISTOGRAM_SIGFIGS,
        )?;

        Ok(Self {
            histogram,
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
        })
    }

    /// Record one sample in milliseconds
    pub fn record(&mut self, value_ms: f64) {
        if self.count == 0 {
            self.min = value_ms;
            self.max = value_ms;
        } else {
            self.min = self.min.min(value_ms);
            self.max = self.max.max(value_ms);
        }
        self.count += 1;
        self.sum += value_ms;

        if value_ms > 0.0 {
            // Clamped into range, so the record cannot fail.
            let clamped = (value_ms.ceil() as u64).clamp(HISTOGRAM_LOWEST_MS, HISTOGRAM_HIGHEST_MS);
            self.histogram.saturating_record(clamped);
        }
    }

    /// Number of values recorded since the last reset, zeros included
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Build the summary for the samples recorded so far
    pub fn to_metric(&self) -> TimingMetric {
        if self.count == 0 {
            return TimingMetric::default();
        }

        let percentile = |q: f64| {
            if self.histogram.is_empty() {
                0.0
            } else {
                self.histogram.value_at_quantile(q) as f64
            }
        };

        TimingMetric {
            count: self.count,
            sum: self.sum,
            average: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            p50: percentile(0.50),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }

    /// Clear all samples
    pub fn reset(&mut self) {
        self.histogram.reset();
        self.count = 0;
        self.sum = 0.0;
        self.min = 0.0;
        self.max = 0.0;
    }
}

impl std::fmt::Debug for TimingAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingAccumulator")
            .field("count", &self.count)
            .field("sum", &self.sum)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("histogram_len", &self.histogram.len())
            .finish()
    }
}

/// Utility functions for presenting metrics
pub mod utils {
    /// Format a millisecond latency for human-readable output
    pub fn format_latency_ms(latency_ms: f64) -> String {
        if latency_ms < 1.0 {
            format!("{:.0}μs", latency_ms * 1_000.0)
        } else if latency_ms < 1_000.0 {
            format!("{:.2}ms", latency_ms)
        } else {
            format!("{:.2}s", latency_ms / 1_000.0)
        }
    }

    /// Format throughput value for human-readable output
    pub fn format_throughput(bytes_per_second: f64) -> String {
        if bytes_per_second < 1024.0 {
            format!("{:.2} B/s", bytes_per_second)
        } else if bytes_per_second < 1024.0 * 1024.0 {
            format!("{:.2} KB/s", bytes_per_second / 1024.0)
        } else if bytes_per_second < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.2} MB/s", bytes_per_second / (1024.0 * 1024.0))
        } else {
            format!("{:.2} GB/s", bytes_per_second / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_excluded_from_percentiles() {
        let mut acc = TimingAccumulator::new().unwrap();
        for v in [0.0, 0.0, 10.0, 20.0, 30.0] {
            acc.record(v);
        }

        let metric = acc.to_metric();
        assert_eq!(metric.count, 5);
        assert_eq!(metric.sum, 60.0);
        assert_eq!(metric.average, 12.0);
        assert_eq!(metric.min, 0.0);
        assert_eq!(metric.max, 30.0);
        // Median of [10, 20, 30]; the two zeros never reach the histogram.
        assert_eq!(metric.p50, 20.0);
        assert_eq!(metric.p99, 30.0);
    }

    #[test]
    fn test_only_zero_values_yield_zero_percentiles() {
        let mut acc = TimingAccumulator::new().unwrap();
        acc.record(0.0);
        acc.record(0.0);

        let metric = acc.to_metric();
        assert_eq!(metric.count, 2);
        assert_eq!(metric.p50, 0.0);
        assert_eq!(metric.p90, 0.0);
        assert_eq!(metric.p95, 0.0);
        assert_eq!(metric.p99, 0.0);
    }

    #[test]
    fn test_empty_accumulator_is_all_zero() {
        let acc = TimingAccumulator::new().unwrap();
        assert_eq!(acc.to_metric(), TimingMetric::default());
    }

    #[test]
    fn test_fractional_and_out_of_range_values_are_clamped() {
        let mut acc = TimingAccumulator::new().unwrap();
        acc.record(0.2);
        acc.record(5_000_000.0);

        let metric = acc.to_metric();
        assert_eq!(metric.count, 2);
        assert_eq!(metric.max, 5_000_000.0);
        // 0.2ms rounds up to the 1ms floor.
        assert_eq!(metric.p50, 1.0);
        assert!(metric.p99 <= HISTOGRAM_HIGHEST_MS as f64 * 1.001);
    }

    #[test]
    fn test_to_metric_does_not_mutate() {
        let mut acc = TimingAccumulator::new().unwrap();
        acc.record(12.0);
        let first = acc.to_metric();
        let second = acc.to_metric();
        assert_eq!(first, second);
        assert_eq!(acc.count(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut acc = TimingAccumulator::new().unwrap();
        acc.record(4.0);
        acc.record(8.0);
        acc.reset();

        assert_eq!(acc.count(), 0);
        assert_eq!(acc.to_metric(), TimingMetric::default());

        acc.record(3.0);
        let metric = acc.to_metric();
        assert_eq!(metric.min, 3.0);
        assert_eq!(metric.max, 3.0);
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(utils::format_latency_ms(0.5), "500μs");
        assert_eq!(utils::format_latency_ms(1.5), "1.50ms");
        assert_eq!(utils::format_latency_ms(1500.0), "1.50s");
    }

    #[test]
    fn test_format_throughput() {
        assert_eq!(utils::format_throughput(500.0), "500.00 B/s");
        assert_eq!(utils::format_throughput(1536.0), "1.50 KB/s");
        assert_eq!(utils::format_throughput(1572864.0), "1.50 MB/s");
        assert_eq!(utils::format_throughput(1610612736.0), "1.50 GB/s");
    }
}
