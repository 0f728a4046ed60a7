//! Scheduler for concurrent task execution.
//!
//! The Scheduler owns a [`TaskGraph`] for the length of one run. It
//! dispatches every ready task to its domain executor on a separate tokio
//! task, waits for any dispatch to finish, applies the outcome to the graph
//! and repeats until every task is terminal. The graph is only ever touched
//! by the scheduler loop itself; dispatches hand back their outcome through
//! the `JoinSet`.

use crate::core::graph::TaskGraph;
use crate::core::task::{TaskError, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::aggregator::{AggregatedResult, ResultAggregator};
use crate::orchestration::RequestId;
use crate::registry::{DomainRegistry, Executor, TaskContext};
use crate::{rlog, rlog_debug, rlog_error, rlog_trace, rlog_warn};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What happens to the dependents of a failed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail every transitive dependent with `DependencyFailed`.
    #[default]
    Propagate,
    /// Leave dependents pending; the run ends in `Deadlock`.
    Block,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Propagate => write!(f, "propagate"),
            FailurePolicy::Block => write!(f, "block"),
        }
    }
}

/// Runtime knobs for one scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub failure_policy: FailurePolicy,
    /// Upper bound on each executor call.
    pub task_timeout: Option<Duration>,
    /// Upper bound on dispatches in flight at once.
    pub max_concurrent: Option<usize>,
}

impl SchedulerConfig {
    /// Reject limits under which no task could ever run.
    ///
    /// # Errors
    /// `Validation` for a zero concurrency cap or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == Some(0) {
            return Err(Error::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(Error::Validation(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Complete,
}

/// Events emitted by the scheduler for task lifecycle changes.
///
/// Every event carries the id of the run that produced it, so one channel
/// can observe several runs. Sent with `try_send`: a full channel drops
/// events rather than stalling the run.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A task was marked in-progress and handed to its executor.
    TaskStarted {
        request_id: RequestId,
        task_id: TaskId,
        domain: String,
    },
    /// A task completed successfully.
    TaskCompleted {
        request_id: RequestId,
        task_id: TaskId,
    },
    /// A task failed, directly or through a failed dependency.
    TaskFailed {
        request_id: RequestId,
        task_id: TaskId,
        error: TaskError,
    },
    /// All tasks in the graph are terminal.
    AllTasksComplete { request_id: RequestId },
}

impl SchedulerEvent {
    /// The run this event belongs to.
    pub fn request_id(&self) -> RequestId {
        match self {
            SchedulerEvent::TaskStarted { request_id, .. }
            | SchedulerEvent::TaskCompleted { request_id, .. }
            | SchedulerEvent::TaskFailed { request_id, .. }
            | SchedulerEvent::AllTasksComplete { request_id } => *request_id,
        }
    }
}

type DispatchOutcome = (TaskId, std::result::Result<serde_json::Value, TaskError>);

/// Drives a single TaskGraph to completion.
///
/// # Example
///
/// ```ignore
/// let graph = TaskGraph::from_plan(&plan)?;
/// let mut scheduler = Scheduler::new(RequestId::new(), graph, registry, SchedulerConfig::default());
/// let result = scheduler.run().await?;
/// println!("{}", result.response);
/// ```
pub struct Scheduler {
    request_id: RequestId,
    graph: TaskGraph,
    registry: Arc<dyn DomainRegistry>,
    config: SchedulerConfig,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    cancel: CancellationToken,
    in_flight: JoinSet<DispatchOutcome>,
    state: RunState,
}

impl Scheduler {
    pub fn new(
        request_id: RequestId,
        graph: TaskGraph,
        registry: Arc<dyn DomainRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            request_id,
            graph,
            registry,
            config,
            event_tx: None,
            cancel: CancellationToken::new(),
            in_flight: JoinSet::new(),
            state: RunState::Running,
        }
    }

    /// Emit lifecycle events on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Stop the run when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Consume the scheduler, returning its graph.
    pub fn into_graph(self) -> TaskGraph {
        self.graph
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of dispatches in flight.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    fn has_capacity(&self) -> bool {
        self.config
            .max_concurrent
            .map_or(true, |max| self.in_flight.len() < max)
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                rlog_trace!("Run {}: event dropped (channel full or closed)", self.request_id.short());
            }
        }
    }

    /// Dispatch every ready task the capacity allows.
    ///
    /// Tasks whose domain has no executor are failed on the spot with
    /// `DomainUnavailable` and do not count against capacity. Returns the
    /// number of tasks handed to executors.
    pub fn dispatch_ready_tasks(&mut self) -> Result<usize> {
        let ready: Vec<(TaskId, String)> = self
            .graph
            .ready_tasks()
            .iter()
            .map(|t| (t.id.clone(), t.domain.clone()))
            .collect();
        let mut dispatched = 0;

        for (task_id, domain) in ready {
            // A failure applied earlier in this pass may have settled it.
            if !self.graph.get(task_id.as_str()).is_some_and(|t| t.is_ready()) {
                continue;
            }

            let Some(executor) = self.registry.resolve(&domain) else {
                self.graph.mark_in_progress(task_id.as_str())?;
                rlog_warn!(
                    "Run {}: no executor for domain '{}' (task {})",
                    self.request_id.short(),
                    domain,
                    task_id
                );
                self.apply_failure(&task_id, TaskError::DomainUnavailable { domain })?;
                continue;
            };

            if !self.has_capacity() {
                continue;
            }

            self.graph.mark_in_progress(task_id.as_str())?;
            self.spawn_dispatch(task_id.clone(), domain.clone(), executor)?;
            self.emit(SchedulerEvent::TaskStarted {
                request_id: self.request_id,
                task_id,
                domain,
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn spawn_dispatch(
        &mut self,
        task_id: TaskId,
        domain: String,
        executor: Arc<dyn Executor>,
    ) -> Result<()> {
        let node = self
            .graph
            .get(task_id.as_str())
            .ok_or_else(|| Error::UnknownTaskId(task_id.to_string()))?;
        let description = node.description.clone();

        let upstream: BTreeMap<TaskId, serde_json::Value> = self
            .graph
            .dependencies_of(task_id.as_str())
            .into_iter()
            .filter_map(|dep| {
                let payload = self.graph.get(dep.as_str())?.payload()?.clone();
                Some((dep, payload))
            })
            .collect();

        let context = TaskContext {
            request_id: self.request_id,
            task_id: task_id.clone(),
            domain,
            upstream,
        };
        let timeout = self.config.task_timeout;

        rlog_debug!(
            "Run {}: dispatching task {} to domain '{}'",
            self.request_id.short(),
            task_id,
            context.domain
        );

        self.in_flight.spawn(async move {
            // Also guards panics raised before `execute` returns its future.
            let call = AssertUnwindSafe(async move {
                executor.execute(&description, &context).await
            })
            .catch_unwind();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => flatten(result),
                    Err(_) => Err(TaskError::timeout(limit)),
                },
                None => flatten(call.await),
            };
            (task_id, outcome)
        });
        Ok(())
    }

    /// Apply a dispatch outcome to the graph.
    pub fn apply_outcome(
        &mut self,
        task_id: &TaskId,
        outcome: std::result::Result<serde_json::Value, TaskError>,
    ) -> Result<()> {
        match outcome {
            Ok(payload) => {
                let newly_ready = self.graph.mark_completed(task_id.as_str(), payload)?;
                rlog_debug!(
                    "Run {}: task {} completed, {} newly ready",
                    self.request_id.short(),
                    task_id,
                    newly_ready.len()
                );
                self.emit(SchedulerEvent::TaskCompleted {
                    request_id: self.request_id,
                    task_id: task_id.clone(),
                });
                Ok(())
            }
            Err(error) => self.apply_failure(task_id, error),
        }
    }

    fn apply_failure(&mut self, task_id: &TaskId, error: TaskError) -> Result<()> {
        rlog_warn!(
            "Run {}: task {} failed: {}",
            self.request_id.short(),
            task_id,
            error
        );
        self.graph.mark_failed(task_id.as_str(), error.clone())?;
        self.emit(SchedulerEvent::TaskFailed {
            request_id: self.request_id,
            task_id: task_id.clone(),
            error,
        });

        if self.config.failure_policy == FailurePolicy::Propagate {
            for dependent in self.graph.propagate_failure(task_id.as_str())? {
                let error = self
                    .graph
                    .get(dependent.as_str())
                    .and_then(|t| t.error().cloned())
                    .unwrap_or(TaskError::DependencyFailed {
                        dependency: task_id.clone(),
                    });
                rlog_debug!(
                    "Run {}: task {} skipped: {}",
                    self.request_id.short(),
                    dependent,
                    error
                );
                self.emit(SchedulerEvent::TaskFailed {
                    request_id: self.request_id,
                    task_id: dependent,
                    error,
                });
            }
        }
        Ok(())
    }

    /// Run the scheduling loop until every task is terminal.
    ///
    /// # Errors
    /// - `Validation` if the config could never dispatch a task
    /// - `Deadlock` when tasks remain but none is ready and none is in flight
    /// - `Cancelled` when the cancellation token fires; in-flight dispatches
    ///   are detached and their outcomes discarded
    /// - `TaskJoin` if a dispatch task could not be joined
    pub async fn run(&mut self) -> Result<AggregatedResult> {
        self.config.validate()?;
        rlog!(
            "Run {} started: {} task(s), policy={}",
            self.request_id.short(),
            self.graph.len(),
            self.config.failure_policy
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.abandon());
            }
            if self.graph.is_complete() {
                break;
            }

            self.dispatch_ready_tasks()?;
            rlog_trace!(
                "Run {}: {} in flight, {} pending",
                self.request_id.short(),
                self.in_flight.len(),
                self.graph.pending().len()
            );

            if self.in_flight.is_empty() {
                if self.graph.is_complete() {
                    break;
                }
                return Err(self.deadlock());
            }

            let joined = tokio::select! {
                joined = self.in_flight.join_next() => joined,
                _ = self.cancel.cancelled() => return Err(self.abandon()),
            };

            match joined {
                Some(Ok((task_id, outcome))) => self.apply_outcome(&task_id, outcome)?,
                Some(Err(e)) => {
                    rlog_error!("Run {}: dispatch join failed: {}", self.request_id.short(), e);
                    return Err(Error::TaskJoin(e.to_string()));
                }
                None => {}
            }
        }

        self.state = RunState::Complete;
        self.emit(SchedulerEvent::AllTasksComplete {
            request_id: self.request_id,
        });
        let result = ResultAggregator::aggregate(&self.graph);
        rlog!(
            "Run {} complete: {} succeeded, {} failed",
            self.request_id.short(),
            self.graph.count(TaskStatus::Completed),
            self.graph.count(TaskStatus::Failed)
        );
        Ok(result)
    }

    fn abandon(&mut self) -> Error {
        rlog_warn!(
            "Run {} cancelled with {} dispatch(es) in flight",
            self.request_id.short(),
            self.in_flight.len()
        );
        // Let in-flight executors finish; nothing will read their outcomes.
        self.in_flight.detach_all();
        Error::Cancelled(self.request_id)
    }

    fn deadlock(&self) -> Error {
        let stalled: Vec<String> = self.graph.pending().into_iter().map(|id| id.0).collect();
        let cycles: Vec<Vec<String>> = self
            .graph
            .find_cycles()
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|id| id.0).collect())
            .collect();
        rlog_error!(
            "Run {} deadlocked: stalled={:?} cycles={:?}",
            self.request_id.short(),
            stalled,
            cycles
        );
        Error::Deadlock { stalled, cycles }
    }
}

fn flatten(
    result: std::thread::Result<std::result::Result<serde_json::Value, crate::registry::ExecutorError>>,
) -> std::result::Result<serde_json::Value, TaskError> {
    match result {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(TaskError::ExecutorFailure { message: e.0 }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "executor panicked".to_string());
            Err(TaskError::ExecutorFailure { message })
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("request_id", &self.request_id)
            .field("graph", &self.graph)
            .field("in_flight", &self.in_flight.len())
            .field("state", &self.state)
            .finish()
    }
}
