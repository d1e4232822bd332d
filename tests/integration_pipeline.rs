use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use windowed_metrics::{
    ExecutionContext, ExecutionStatus, IterationDescriptor, JsonLinesSink, PipelineConfig,
    RequestOutcome, SnapshotSink, StatusBoard, WindowPipeline, WindowedIterationSnapshot,
};

fn short_windows() -> PipelineConfig {
    PipelineConfig {
        window_interval: Duration::from_millis(50),
        queue_capacity: 256,
        history_capacity: 64,
    }
}

/// Drive coordinator -> collector -> queue -> consumer -> store with a real
/// timer and check every stored window for one iteration.
#[tokio::test]
async fn pipeline_timer_windows_end_to_end() -> Result<()> {
    let board = Arc::new(StatusBoard::new());
    let pipeline = WindowPipeline::new(
        short_windows(),
        board.clone(),
        ExecutionContext::new("e2e-plan", Utc::now()),
    )?;
    pipeline.start()?;
    let consumer = pipeline.spawn_consumer(None);

    let collector = pipeline.attach_iteration(IterationDescriptor::new(
        "round-1",
        "checkout",
        "http://localhost:8080/checkout",
    ))?;
    let id = collector.iteration_id();
    let aggregators = collector.aggregators().clone();

    // Not started yet: a few ticks pass without any snapshot.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(pipeline.store().count(id), 0);

    board.set(id, ExecutionStatus::Ongoing);
    let mut recorded = 0u64;
    for _ in 0..20 {
        aggregators.throughput.increase_connections_count();
        aggregators.duration.update_total_time(15.0);
        aggregators.response_codes.update_response_code(200, "OK");
        aggregators.data_transmission.update_data_received(1_024);
        aggregators
            .throughput
            .decrease_connections_count(RequestOutcome::Success);
        recorded += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    board.set(id, ExecutionStatus::Success);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(collector.is_finalized());

    pipeline.shutdown();
    let stats = consumer.await?;

    let history = pipeline.store().history(id);
    assert!(!history.is_empty());
    assert_eq!(stats.final_snapshots, 1);
    assert_eq!(stats.received as usize, history.len());

    // Sequences strictly increase; only the last window is final.
    for pair in history.windows(2) {
        assert!(pair[0].window_sequence < pair[1].window_sequence);
        assert!(pair[0].window_end <= pair[1].window_end);
    }
    let (last, earlier) = history.split_last().unwrap();
    assert!(last.is_final);
    assert_eq!(last.execution_status, ExecutionStatus::Success);
    assert!(earlier.iter().all(|s| !s.is_final && s.has_data()));

    // Every request lands in exactly one window.
    let total: u64 = history
        .iter()
        .filter_map(|s| s.throughput.as_ref())
        .map(|t| t.requests_count)
        .sum();
    assert_eq!(total, recorded);

    for snapshot in &history {
        assert_eq!(snapshot.plan_name, "e2e-plan");
        assert_eq!(snapshot.iteration_name, "checkout");
        assert_eq!(snapshot.round_name, "round-1");
    }
    Ok(())
}

/// Several iterations share one coordinator and queue; each one's history
/// only contains its own windows and ends with its own terminal status.
#[tokio::test]
async fn pipeline_isolates_iterations() -> Result<()> {
    let board = Arc::new(StatusBoard::new());
    let pipeline = WindowPipeline::new(
        PipelineConfig {
            window_interval: Duration::from_secs(3600),
            ..short_windows()
        },
        board.clone(),
        ExecutionContext::new("plan", Utc::now()),
    )?;
    pipeline.start()?;
    let consumer = pipeline.spawn_consumer(None);

    let statuses = [
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];
    let mut collectors = Vec::new();
    for (i, _) in statuses.iter().enumerate() {
        let collector = pipeline.attach_iteration(IterationDescriptor::new(
            "round-1",
            format!("iteration-{}", i),
            "http://localhost/",
        ))?;
        board.set(collector.iteration_id(), ExecutionStatus::Ongoing);
        for _ in 0..=i {
            collector
                .aggregators()
                .response_codes
                .update_response_code(200, "OK");
        }
        collectors.push(collector);
    }

    pipeline.coordinator().trigger_window();
    for (collector, status) in collectors.iter().zip(statuses) {
        board.set(collector.iteration_id(), status);
    }
    pipeline.coordinator().trigger_window();
    pipeline.shutdown();
    let stats = consumer.await?;
    assert_eq!(stats.received, 6);
    assert_eq!(stats.final_snapshots, 3);

    for (i, (collector, status)) in collectors.iter().zip(statuses).enumerate() {
        let history = pipeline.store().history(collector.iteration_id());
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|s| s.iteration_id == collector.iteration_id()));
        let codes = history[0].response_codes.as_ref().unwrap();
        assert_eq!(codes.count_for(200), i as u64 + 1);
        assert!(history[1].is_final);
        assert_eq!(history[1].execution_status, status);
    }
    Ok(())
}

/// Snapshots consumed by the pipeline are also written as JSON lines.
#[tokio::test]
async fn pipeline_streams_json_lines() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("windows.jsonl");

    let board = Arc::new(StatusBoard::new());
    let pipeline = WindowPipeline::new(
        short_windows(),
        board.clone(),
        ExecutionContext::new("plan", Utc::now()),
    )?;
    pipeline.start()?;
    let sink: Box<dyn SnapshotSink> = Box::new(JsonLinesSink::create(&path)?);
    let consumer = pipeline.spawn_consumer(Some(sink));

    let collector = pipeline.attach_iteration(IterationDescriptor::new(
        "round-1",
        "iteration-1",
        "http://localhost/",
    ))?;
    board.set(collector.iteration_id(), ExecutionStatus::Ongoing);
    collector.aggregators().data_transmission.update_data_sent(4_096);
    pipeline.coordinator().trigger_window();
    board.set(collector.iteration_id(), ExecutionStatus::Success);

    pipeline.shutdown();
    let stats = consumer.await?;
    assert_eq!(stats.sink_errors, 0);

    let content = std::fs::read_to_string(&path)?;
    let decoded: Vec<WindowedIterationSnapshot> = content
        .lines()
        .map(|line| serde_json::from_str::<WindowedIterationSnapshot>(line))
        .collect::<Result<_, _>>()?;
    assert_eq!(decoded.len() as u64, stats.received);
    assert_eq!(decoded[0].data_transmission.as_ref().unwrap().data_sent, 4_096);
    assert!(decoded.last().unwrap().is_final);
    Ok(())
}
