//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Mock executors with scripted behaviour
//! - A call log and in-flight counters shared across executors
//! - Predefined graph shapes

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use relay::core::TaskGraph;
use relay::orchestration::{RequestId, Scheduler, SchedulerConfig, SchedulerEvent};
use relay::registry::{Executor, ExecutorError, ExecutorRegistry, TaskContext};

/// What a [`MockExecutor`] does when called.
#[derive(Clone)]
pub enum Behavior {
    /// Return `{"response": <description>}`.
    Echo,
    /// Return this payload.
    Respond(Value),
    /// Return an executor error with this message.
    Fail(String),
    /// Sleep, then echo.
    Delay(Duration),
    /// Panic inside the executor.
    Panic,
    /// Wait for the notify, then echo.
    Gate(Arc<Notify>),
}

/// Records which tasks ran and how many ran at once.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Task ids in the order their executors were entered.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of executors running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, task_id: &str) {
        self.calls.lock().unwrap().push(task_id.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An executor driven by a [`Behavior`].
pub struct MockExecutor {
    behavior: Behavior,
    log: Arc<CallLog>,
}

impl MockExecutor {
    pub fn new(behavior: Behavior, log: &Arc<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(
        &self,
        description: &str,
        context: &TaskContext,
    ) -> Result<Value, ExecutorError> {
        self.log.enter(context.task_id.as_str());
        let outcome = match &self.behavior {
            Behavior::Echo => Ok(json!({ "response": description })),
            Behavior::Respond(value) => Ok(value.clone()),
            Behavior::Fail(message) => Err(ExecutorError::new(message.clone())),
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(json!({ "response": description }))
            }
            Behavior::Panic => {
                self.log.exit();
                panic!("mock executor panicked on {}", context.task_id);
            }
            Behavior::Gate(gate) => {
                gate.notified().await;
                Ok(json!({ "response": description }))
            }
        };
        self.log.exit();
        outcome
    }
}

/// Build a registry from `(domain, behavior)` pairs sharing one log.
pub fn registry(entries: &[(&str, Behavior)], log: &Arc<CallLog>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for (domain, behavior) in entries {
        registry.register(domain, MockExecutor::new(behavior.clone(), log));
    }
    registry
}

/// Build a graph from `(id, domain, description, dependencies)` rows.
pub fn graph(rows: &[(&str, &str, &str, &[&str])]) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for (id, domain, description, _) in rows {
        graph
            .add_task(*id, domain, description)
            .expect("Failed to add task");
    }
    for (id, _, _, dependencies) in rows {
        for dependency in dependencies.iter() {
            graph
                .add_dependency(id, dependency)
                .expect("Failed to add dependency");
        }
    }
    graph
}

/// Diamond: a -> {b, c} -> d, all on `domain`.
pub fn diamond_graph(domain: &str) -> TaskGraph {
    graph(&[
        ("a", domain, "A", &[]),
        ("b", domain, "B", &["a"]),
        ("c", domain, "C", &["a"]),
        ("d", domain, "D", &["b", "c"]),
    ])
}

/// `n` tasks with no dependencies, all on `domain`.
pub fn independent_graph(n: usize, domain: &str) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for i in 0..n {
        graph
            .add_task(format!("t{}", i), domain, &format!("T{}", i))
            .expect("Failed to add task");
    }
    graph
}

/// A scheduler wired to an event channel.
pub struct SchedulerHarness {
    pub scheduler: Scheduler,
    pub event_rx: mpsc::Receiver<SchedulerEvent>,
}

impl SchedulerHarness {
    pub fn new(graph: TaskGraph, registry: ExecutorRegistry, config: SchedulerConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(100);
        let scheduler = Scheduler::new(RequestId::new(), graph, Arc::new(registry), config)
            .with_events(event_tx);
        Self {
            scheduler,
            event_rx,
        }
    }

    /// Drain every event sent so far.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
