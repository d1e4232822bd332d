use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use windowed_metrics::{
    ExecutionContext, ExecutionStatus, IterationDescriptor, PipelineConfig, RequestOutcome,
    StatusBoard, WindowPipeline,
};

const WRITERS: u64 = 8;
const REQUESTS_PER_WRITER: u64 = 5_000;

/// Writers hammer one iteration's aggregators from plain threads while
/// windows are closed concurrently. No update may be lost or counted twice:
/// the per-window totals must add up to exactly what was written.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_against_window_closes() -> Result<()> {
    let board = Arc::new(StatusBoard::new());
    let pipeline = WindowPipeline::new(
        PipelineConfig {
            window_interval: Duration::from_millis(5),
            queue_capacity: 10_000,
            history_capacity: 10_000,
        },
        board.clone(),
        ExecutionContext::new("concurrency", Utc::now()),
    )?;
    pipeline.start()?;
    let consumer = pipeline.spawn_consumer(None);

    let collector = pipeline.attach_iteration(IterationDescriptor::new(
        "round-1",
        "hammer",
        "http://localhost/",
    ))?;
    let id = collector.iteration_id();
    board.set(id, ExecutionStatus::Ongoing);

    let done = Arc::new(AtomicBool::new(false));
    let trigger = {
        let coordinator = pipeline.coordinator().clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                coordinator.trigger_window();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let aggregators = collector.aggregators().clone();
            thread::spawn(move || {
                for i in 0..REQUESTS_PER_WRITER {
                    let outcome = if i % 10 == 0 {
                        RequestOutcome::Failure
                    } else {
                        RequestOutcome::Success
                    };
                    aggregators.throughput.increase_connections_count();
                    aggregators.duration.update_total_time((w + 1) as f64);
                    aggregators
                        .response_codes
                        .update_response_code(if i % 10 == 0 { 500 } else { 200 }, "x");
                    aggregators.data_transmission.update_data_sent(3);
                    aggregators.throughput.decrease_connections_count(outcome);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer thread panicked");
    }
    done.store(true, Ordering::Relaxed);
    trigger.join().expect("trigger thread panicked");

    board.set(id, ExecutionStatus::Success);
    pipeline.shutdown();
    let stats = consumer.await?;
    assert_eq!(stats.final_snapshots, 1);
    assert_eq!(pipeline.queue().stats().dropped, 0);

    let history = pipeline.store().history(id);
    assert_eq!(history.len() as u64, stats.received);

    let total = WRITERS * REQUESTS_PER_WRITER;
    let failures = WRITERS * (REQUESTS_PER_WRITER / 10);
    let expected_sum: f64 = (1..=WRITERS).map(|w| (w * REQUESTS_PER_WRITER) as f64).sum();

    let mut requests = 0;
    let mut failed = 0;
    let mut duration_count = 0;
    let mut duration_sum = 0.0;
    let mut code_total = 0;
    let mut code_500 = 0;
    let mut bytes = 0;
    for snapshot in &history {
        if let Some(t) = &snapshot.throughput {
            requests += t.requests_count;
            failed += t.failed_requests_count;
            assert_eq!(
                t.requests_count,
                t.successful_request_count + t.failed_requests_count
            );
        }
        if let Some(d) = &snapshot.duration {
            duration_count += d.total_time.count;
            duration_sum += d.total_time.sum;
        }
        if let Some(c) = &snapshot.response_codes {
            code_total += c.total();
            code_500 += c.count_for(500);
        }
        if let Some(d) = &snapshot.data_transmission {
            bytes += d.data_sent;
        }
    }

    assert_eq!(requests, total);
    assert_eq!(failed, failures);
    assert_eq!(duration_count, total);
    assert!((duration_sum - expected_sum).abs() < 1e-6);
    assert_eq!(code_total, total);
    assert_eq!(code_500, failures);
    assert_eq!(bytes, total * 3);
    Ok(())
}

/// Many iterations attach, run and finish while the timer is ticking; every
/// one of them produces exactly one final snapshot.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_iterations_each_finalize_once() -> Result<()> {
    let board = Arc::new(StatusBoard::new());
    let pipeline = Arc::new(WindowPipeline::new(
        PipelineConfig {
            window_interval: Duration::from_millis(10),
            queue_capacity: 4_096,
            history_capacity: 256,
        },
        board.clone(),
        ExecutionContext::new("concurrency", Utc::now()),
    )?);
    pipeline.start()?;
    let consumer = pipeline.spawn_consumer(None);

    let mut tasks = Vec::new();
    for i in 0..32u64 {
        let pipeline = Arc::clone(&pipeline);
        let board = board.clone();
        tasks.push(tokio::spawn(async move {
            let collector = pipeline
                .attach_iteration(IterationDescriptor::new(
                    "round-1",
                    format!("iteration-{}", i),
                    "http://localhost/",
                ))
                .expect("attach iteration");
            let id = collector.iteration_id();
            board.set(id, ExecutionStatus::Ongoing);
            for _ in 0..10 {
                collector
                    .aggregators()
                    .response_codes
                    .update_response_code(200, "OK");
                tokio::time::sleep(Duration::from_millis(2 + i % 5)).await;
            }
            board.set(id, ExecutionStatus::Success);
            collector
        }));
    }

    let mut collectors = Vec::new();
    for task in tasks {
        collectors.push(task.await?);
    }
    // Let the timer observe every terminal status before shutting down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline.shutdown();
    let stats = consumer.await?;

    assert_eq!(stats.final_snapshots, 32);
    for collector in &collectors {
        assert!(collector.is_finalized());
        let history = pipeline.store().history(collector.iteration_id());
        let finals = history.iter().filter(|s| s.is_final).count();
        assert_eq!(finals, 1);
        assert!(history.last().unwrap().is_final);
        let total: u64 = history
            .iter()
            .filter_map(|s| s.response_codes.as_ref())
            .map(|c| c.total())
            .sum();
        assert_eq!(total, 10);
    }
    Ok(())
}
