//! # Simulated Load
//!
//! Synthetic HTTP traffic for exercising the pipeline without a target
//! server. Each iteration runs a fixed number of virtual users for a fixed
//! duration; every simulated request walks through the same recording calls
//! a real execution engine makes (connection opened, phase timings, response
//! code, bytes, connection closed) and the iteration's status is published
//! on a [`StatusBoard`] as it progresses.

use crate::aggregators::{IterationAggregators, RequestOutcome};
use crate::collector::StatusBoard;
use crate::snapshot::{ExecutionStatus, IterationId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const FAILURE_CODES: [(u16, &str); 4] = [
    (404, "Not Found"),
    (500, "Internal Server Error"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
];

/// Shape of the synthetic traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub concurrency: usize,
    pub duration: Duration,
    /// Probability in `[0, 1]` that a request fails
    pub failure_rate: f64,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            concurrency: crate::defaults::CONCURRENCY,
            duration: crate::defaults::RUN_DURATION,
            failure_rate: crate::defaults::FAILURE_RATE,
        }
    }
}

/// One synthetic request: phase timings in milliseconds plus its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSample {
    pub tcp_handshake_ms: f64,
    pub tls_handshake_ms: f64,
    pub request_sent_ms: f64,
    pub time_to_first_byte_ms: f64,
    pub content_transfer_ms: f64,
    pub status_code: u16,
    pub reason: &'static str,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl RequestSample {
    /// Draw one request
    ///
    /// ## Parameters
    /// - `rng`: random source; seed it for reproducible samples
    /// - `failure_rate`: probability of an error response, clamped to 0..=1
    ///   (non-finite values count as 0)
    pub fn generate(rng: &mut impl Rng, failure_rate: f64) -> Self {
        let p = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let failed = rng.gen_bool(p);
        let (status_code, reason) = if failed {
            FAILURE_CODES[rng.gen_range(0..FAILURE_CODES.len())]
        } else {
            (200, "OK")
        };

        Self {
            tcp_handshake_ms: rng.gen_range(0.5..5.0),
            tls_handshake_ms: rng.gen_range(1.0..12.0),
            request_sent_ms: rng.gen_range(0.0..1.0),
            time_to_first_byte_ms: rng.gen_range(5.0..80.0),
            content_transfer_ms: rng.gen_range(0.5..25.0),
            status_code,
            reason,
            bytes_sent: rng.gen_range(200..2_048),
            bytes_received: if failed {
                rng.gen_range(100..512)
            } else {
                rng.gen_range(1_024..65_536)
            },
        }
    }

    /// End-to-end time as the sum of every phase
    pub fn total_ms(&self) -> f64 {
        self.tcp_handshake_ms
            + self.tls_handshake_ms
            + self.request_sent_ms
            + self.time_to_first_byte_ms
            + self.content_transfer_ms
    }

    /// Failure for any 4xx or 5xx status
    pub fn outcome(&self) -> RequestOutcome {
        if self.status_code < 400 {
            RequestOutcome::Success
        } else {
            RequestOutcome::Failure
        }
    }

    /// Record the completed request. The connection must already have been
    /// opened with `increase_connections_count`.
    pub fn record(&self, aggregators: &IterationAggregators) {
        let duration = &aggregators.duration;
        duration.update_tcp_handshake_time(self.tcp_handshake_ms);
        duration.update_tls_handshake_time(self.tls_handshake_ms);
        duration.update_request_sent_time(self.request_sent_ms);
        duration.update_time_to_first_byte(self.time_to_first_byte_ms);
        duration.update_content_transfer_time(self.content_transfer_ms);
        duration.update_total_time(self.total_ms());

        aggregators
            .response_codes
            .update_response_code(self.status_code, self.reason);
        aggregators.data_transmission.update_data_sent(self.bytes_sent);
        aggregators
            .data_transmission
            .update_data_received(self.bytes_received);
        aggregators
            .throughput
            .decrease_connections_count(self.outcome());
    }
}

/// Totals for one simulated iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub iteration_id: IterationId,
    pub requests: u64,
    pub failures: u64,
    pub status: ExecutionStatus,
}

/// Drives synthetic requests into one iteration's aggregators
pub struct SimulatedLoad {
    iteration_id: IterationId,
    aggregators: IterationAggregators,
    board: Arc<StatusBoard>,
    profile: LoadProfile,
}

impl SimulatedLoad {
    /// Prepare a load for the iteration owning `aggregators`
    pub fn new(
        aggregators: IterationAggregators,
        board: Arc<StatusBoard>,
        profile: LoadProfile,
    ) -> Self {
        Self {
            iteration_id: aggregators.iteration_id(),
            aggregators,
            board,
            profile,
        }
    }

    /// Run until the profile's duration elapses or `cancel` fires
    ///
    /// The iteration is `Ongoing` while running and ends `Cancelled` if it was
    /// interrupted, `Failed` if a virtual user task died, otherwise `Success`.
    pub async fn run(self, cancel: CancellationToken) -> SimulationReport {
        self.board.set(self.iteration_id, ExecutionStatus::Ongoing);
        debug!(
            "Iteration {} started with {} virtual users",
            self.iteration_id, self.profile.concurrency
        );

        let deadline = Instant::now() + self.profile.duration;
        let requests = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let mut users = Vec::with_capacity(self.profile.concurrency);
        for _ in 0..self.profile.concurrency.max(1) {
            users.push(tokio::spawn(virtual_user(
                self.aggregators.clone(),
                self.profile.failure_rate,
                deadline,
                cancel.clone(),
                Arc::clone(&requests),
                Arc::clone(&failures),
            )));
        }
        let failed_users = join_users(self.iteration_id, users).await;
        let status = final_status(cancel.is_cancelled(), failed_users);
        self.board.set(self.iteration_id, status);

        let report = SimulationReport {
            iteration_id: self.iteration_id,
            requests: requests.load(Ordering::Relaxed),
            failures: failures.load(Ordering::Relaxed),
            status,
        };
        debug!("Iteration {} finished: {:?}", self.iteration_id, report);
        report
    }
}

/// Await every virtual user, logging the ones that died
///
/// ## Returns
///
/// The number of user tasks that panicked or were aborted.
async fn join_users(iteration_id: IterationId, users: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for user in users {
        if let Err(e) = user.await {
            warn!("Virtual user of iteration {} failed: {}", iteration_id, e);
            failed += 1;
        }
    }
    failed
}

fn final_status(cancelled: bool, failed_users: usize) -> ExecutionStatus {
    if cancelled {
        ExecutionStatus::Cancelled
    } else if failed_users > 0 {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Success
    }
}

async fn virtual_user(
    aggregators: IterationAggregators,
    failure_rate: f64,
    deadline: Instant,
    cancel: CancellationToken,
    requests: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
) {
    let mut rng = StdRng::from_entropy();

    while Instant::now() < deadline && !cancel.is_cancelled() {
        let sample = RequestSample::generate(&mut rng, failure_rate);

        aggregators.throughput.increase_connections_count();
        let latency = Duration::from_secs_f64(sample.total_ms() / 1_000.0);
        tokio::select! {
            _ = tokio::time::sleep(latency) => {}
            _ = cancel.cancelled() => {}
        }
        sample.record(&aggregators);

        requests.fetch_add(1, Ordering::Relaxed);
        if sample.outcome() == RequestOutcome::Failure {
            failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}
