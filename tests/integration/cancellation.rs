//! Cancellation tests.
//!
//! Cancelling a run stops new dispatches, discards in-flight outcomes and
//! releases the request id.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use relay::config::Config;
use relay::core::TaskStatus;
use relay::orchestration::{Orchestrator, RequestId, SchedulerConfig};
use relay::plan::{Plan, SubtaskSpec};
use relay::Error;

use crate::fixtures::{graph, registry, Behavior, CallLog, SchedulerHarness};

async fn wait_for_calls(log: &CallLog, n: usize) {
    for _ in 0..200 {
        if log.calls().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("executors were never entered");
}

#[tokio::test]
async fn test_cancel_stops_dependents_from_dispatching() {
    let gate = Arc::new(Notify::new());
    let log = CallLog::new();
    let registry = registry(
        &[("gated", Behavior::Gate(Arc::clone(&gate))), ("next", Behavior::Echo)],
        &log,
    );
    let graph = graph(&[("first", "gated", "f", &[]), ("second", "next", "s", &["first"])]);
    let token = CancellationToken::new();
    let mut harness = SchedulerHarness::new(graph, registry, SchedulerConfig::default());
    harness.scheduler = harness.scheduler.with_cancellation(token.clone());

    let canceller = {
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            wait_for_calls(&log, 1).await;
            token.cancel();
        })
    };

    let err = harness.scheduler.run().await.unwrap_err();
    canceller.await.unwrap();
    assert!(matches!(err, Error::Cancelled(_)));

    // Releasing the executor after cancellation changes nothing.
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let graph = harness.scheduler.graph();
    assert_eq!(graph.get("first").unwrap().status, TaskStatus::InProgress);
    assert_eq!(graph.get("second").unwrap().status, TaskStatus::Pending);
    assert_eq!(log.calls(), vec!["first"]);
    assert_eq!(harness.scheduler.active_count(), 0);
}

#[tokio::test]
async fn test_orchestrator_cancel_only_affects_target_run() {
    let gate = Arc::new(Notify::new());
    let log = CallLog::new();
    let registry = registry(&[("gated", Behavior::Gate(Arc::clone(&gate)))], &log);
    let orchestrator = Orchestrator::new(Arc::new(registry), Config::default());

    let plan = Plan::new(vec![SubtaskSpec::new("t1", "gated", "wait")]);
    let doomed = RequestId::new();
    let survivor = RequestId::new();

    let run_doomed = {
        let orchestrator = orchestrator.clone();
        let plan = plan.clone();
        tokio::spawn(async move { orchestrator.run_plan(doomed, &plan).await })
    };
    let run_survivor = {
        let orchestrator = orchestrator.clone();
        let plan = plan.clone();
        tokio::spawn(async move { orchestrator.run_plan(survivor, &plan).await })
    };

    wait_for_calls(&log, 2).await;
    let mut active = orchestrator.active_runs();
    active.sort_by_key(|id| id.to_string());
    let mut expected = vec![doomed, survivor];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(active, expected);

    assert!(orchestrator.cancel(doomed));
    let err = run_doomed.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(id) if id == doomed));
    assert!(!orchestrator.is_active(doomed));
    assert!(orchestrator.is_active(survivor));

    // Wake every waiter, including the detached one from the cancelled run.
    gate.notify_waiters();
    let result = run_survivor.await.unwrap().unwrap();
    assert_eq!(result.response, "wait");
    assert!(orchestrator.active_runs().is_empty());
}

/// Given a run whose only task sleeps for 30s
/// When the caller stops awaiting it after 20ms
/// Then the request id is released and can be run again
#[tokio::test]
async fn test_abandoned_run_releases_request_id() {
    let log = CallLog::new();
    let slow = Orchestrator::new(
        Arc::new(registry(&[("work", Behavior::Delay(Duration::from_secs(30)))], &log)),
        Config::default(),
    );
    let plan = Plan::new(vec![SubtaskSpec::new("t1", "work", "again")]);
    let id = RequestId::new();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), slow.run_plan(id, &plan)).await;
    assert!(abandoned.is_err());
    assert!(!slow.is_active(id));

    // A rejected id would return RunExists at once instead of running.
    let rerun = tokio::time::timeout(Duration::from_millis(20), slow.run_plan(id, &plan)).await;
    assert!(rerun.is_err());
    assert!(!slow.is_active(id));
    assert_eq!(log.calls(), vec!["t1".to_string(), "t1".to_string()]);
}
