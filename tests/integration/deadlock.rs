//! Deadlock detection tests.
//!
//! A run that can make no progress must end with `Deadlock`, never hang.

use std::time::Duration;

use relay::core::TaskStatus;
use relay::orchestration::SchedulerConfig;
use relay::Error;

use crate::fixtures::{graph, registry, Behavior, CallLog, SchedulerHarness};

async fn run_with_deadline(harness: &mut SchedulerHarness) -> relay::Result<relay::AggregatedResult> {
    tokio::time::timeout(Duration::from_secs(5), harness.scheduler.run())
        .await
        .expect("scheduler hung instead of reporting deadlock")
}

#[tokio::test]
async fn test_two_task_cycle_deadlocks() {
    let log = CallLog::new();
    let registry = registry(&[("d", Behavior::Echo)], &log);
    let graph = graph(&[("a", "d", "a", &["b"]), ("b", "d", "b", &["a"])]);
    let mut harness = SchedulerHarness::new(graph, registry, SchedulerConfig::default());

    let err = run_with_deadline(&mut harness).await.unwrap_err();

    match err {
        Error::Deadlock { stalled, cycles } => {
            assert_eq!(stalled, vec!["a", "b"]);
            assert_eq!(cycles, vec![vec!["a".to_string(), "b".to_string()]]);
        }
        other => panic!("expected deadlock, got {other:?}"),
    }
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_cycle_downstream_of_completed_work() {
    let log = CallLog::new();
    let registry = registry(&[("d", Behavior::Echo)], &log);
    let graph = graph(&[
        ("start", "d", "s", &[]),
        ("x", "d", "x", &["start", "z"]),
        ("y", "d", "y", &["x"]),
        ("z", "d", "z", &["y"]),
        ("free", "d", "f", &[]),
    ]);
    let mut harness = SchedulerHarness::new(graph, registry, SchedulerConfig::default());

    let err = run_with_deadline(&mut harness).await.unwrap_err();

    let Error::Deadlock { stalled, cycles } = err else {
        panic!("expected deadlock");
    };
    assert_eq!(stalled, vec!["x", "y", "z"]);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0], vec!["x", "y", "z"]);

    let graph = harness.scheduler.graph();
    assert_eq!(graph.get("start").unwrap().status, TaskStatus::Completed);
    assert_eq!(graph.get("free").unwrap().status, TaskStatus::Completed);
    assert!(err_message_names_tasks(&stalled));
}

fn err_message_names_tasks(stalled: &[String]) -> bool {
    let message = Error::Deadlock {
        stalled: stalled.to_vec(),
        cycles: Vec::new(),
    }
    .to_string();
    message == "Deadlock: 3 task(s) can never run (x, y, z)"
}

#[tokio::test]
async fn test_cyclic_graph_has_no_topological_order() {
    let graph = graph(&[("a", "d", "a", &["b"]), ("b", "d", "b", &["a"])]);
    assert!(matches!(graph.topological_order(), Err(Error::Validation(_))));
    assert!(graph.ready_tasks().is_empty());
}
