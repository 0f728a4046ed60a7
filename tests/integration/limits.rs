//! Timeout and concurrency-cap tests.

use std::time::Duration;

use relay::core::{TaskError, TaskStatus};
use relay::orchestration::SchedulerConfig;
use relay::Error;

use crate::fixtures::{graph, independent_graph, registry, Behavior, CallLog, SchedulerHarness};

#[tokio::test]
async fn test_timeout_fails_only_the_slow_task() {
    let log = CallLog::new();
    let registry = registry(
        &[
            ("slow", Behavior::Delay(Duration::from_secs(30))),
            ("fast", Behavior::Echo),
        ],
        &log,
    );
    let graph = graph(&[
        ("slow", "slow", "s", &[]),
        ("fast", "fast", "f", &[]),
        ("after", "fast", "a", &["slow"]),
    ]);
    let config = SchedulerConfig {
        task_timeout: Some(Duration::from_millis(50)),
        ..SchedulerConfig::default()
    };
    let mut harness = SchedulerHarness::new(graph, registry, config);

    let result = tokio::time::timeout(Duration::from_secs(5), harness.scheduler.run())
        .await
        .expect("timeout did not bound the slow executor")
        .unwrap();

    assert_eq!(
        result.get("slow").unwrap().error,
        Some(TaskError::Timeout { after_ms: 50 })
    );
    assert_eq!(result.get("fast").unwrap().status, TaskStatus::Completed);
    assert_eq!(result.get("after").unwrap().status, TaskStatus::Failed);
    assert!(result.response.starts_with("Task slow failed: Timed out after 50ms"));
}

#[tokio::test]
async fn test_max_concurrent_caps_in_flight_dispatches() {
    let log = CallLog::new();
    let registry = registry(&[("work", Behavior::Delay(Duration::from_millis(20)))], &log);
    let config = SchedulerConfig {
        max_concurrent: Some(2),
        ..SchedulerConfig::default()
    };
    let mut harness = SchedulerHarness::new(independent_graph(6, "work"), registry, config);

    let result = harness.scheduler.run().await.unwrap();

    assert_eq!(result.succeeded().len(), 6);
    assert_eq!(log.calls().len(), 6);
    assert!(log.peak() <= 2, "peak in flight was {}", log.peak());
}

/// Given a cap of zero in-flight dispatches
/// When the scheduler runs
/// Then it refuses the config instead of reporting a deadlock
#[tokio::test]
async fn test_zero_cap_is_rejected_not_deadlocked() {
    let log = CallLog::new();
    let registry = registry(&[("work", Behavior::Echo)], &log);
    let config = SchedulerConfig {
        max_concurrent: Some(0),
        ..SchedulerConfig::default()
    };
    let mut harness = SchedulerHarness::new(independent_graph(2, "work"), registry, config);

    let err = harness.scheduler.run().await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(log.calls().is_empty());
    assert!(harness.drain_events().is_empty());
}

#[tokio::test]
async fn test_unbounded_runs_independent_tasks_together() {
    let log = CallLog::new();
    let registry = registry(&[("work", Behavior::Delay(Duration::from_millis(50)))], &log);
    let mut harness =
        SchedulerHarness::new(independent_graph(4, "work"), registry, SchedulerConfig::default());

    let result = harness.scheduler.run().await.unwrap();

    assert_eq!(result.succeeded().len(), 4);
    assert_eq!(log.peak(), 4);
}
