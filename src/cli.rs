use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Windowed Metrics - simulate a load test and stream per-iteration window snapshots
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Length of each metrics window (e.g. 500ms, 5s, 1m)
    #[clap(short = 'w', long, value_parser = parse_duration, default_value = "5s", help_heading = "Pipeline Options")]
    pub window_interval: Duration,

    /// Snapshots buffered before the oldest are dropped
    #[clap(long, default_value_t = crate::defaults::QUEUE_CAPACITY, help_heading = "Pipeline Options")]
    pub queue_capacity: usize,

    /// Snapshots retained per iteration
    #[clap(long, default_value_t = crate::defaults::HISTORY_CAPACITY, help_heading = "Pipeline Options")]
    pub history_capacity: usize,

    /// How long each simulated iteration generates load
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "20s", help_heading = "Load Options")]
    pub duration: Duration,

    /// Number of iterations to simulate
    #[clap(short = 'i', long, default_value_t = crate::defaults::ITERATIONS, help_heading = "Load Options")]
    pub iterations: usize,

    /// Concurrent virtual users per iteration
    #[clap(short = 'c', long, default_value_t = crate::defaults::CONCURRENCY, help_heading = "Load Options")]
    pub concurrency: usize,

    /// Probability that a simulated request fails (0.0 - 1.0)
    #[clap(long, default_value_t = crate::defaults::FAILURE_RATE, help_heading = "Load Options")]
    pub failure_rate: f64,

    /// Plan name stamped onto every snapshot
    #[clap(long, default_value = crate::defaults::PLAN_NAME)]
    pub plan_name: String,

    /// Target URL stamped onto every snapshot
    #[clap(long, default_value = crate::defaults::TARGET_URL)]
    pub target_url: String,

    /// Write every snapshot to this file as JSON lines
    #[clap(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
///
/// A bare number is taken as seconds. Fractions are allowed ("1.5s").
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, scale) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 0.001)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1.0)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60.0)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3600.0)
    } else {
        (s, 1.0)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    Ok(Duration::from_secs_f64(num * scale))
}
