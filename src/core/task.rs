//! Task data model for the dependency graph.
//!
//! A `TaskNode` is the atomic unit of work handed to a domain executor. It
//! tracks the dependencies still blocking it, the tasks waiting on it, its
//! lifecycle status and, once terminal, its outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Caller-assigned identifier for a task, unique within one graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> InProgress` happens at most once. `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Declared, not yet dispatched.
    Pending,
    /// Handed to an executor, awaiting its outcome.
    InProgress,
    /// Executor returned a payload.
    Completed,
    /// Executor, registry or timeout reported an error.
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a single task failed.
///
/// These never abort a run; they resolve to a failed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskError {
    /// No executor is registered for the task's domain.
    DomainUnavailable { domain: String },
    /// The executor reported an error.
    ExecutorFailure { message: String },
    /// The executor did not finish within the dispatch timeout.
    Timeout { after_ms: u64 },
    /// A task this one depends on failed (propagate policy).
    DependencyFailed { dependency: TaskId },
}

impl TaskError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::DomainUnavailable { domain } => {
                write!(f, "Domain agent not available: {}", domain)
            }
            TaskError::ExecutorFailure { message } => write!(f, "{}", message),
            TaskError::Timeout { after_ms } => write!(f, "Timed out after {}ms", after_ms),
            TaskError::DependencyFailed { dependency } => {
                write!(f, "Dependency {} failed", dependency)
            }
        }
    }
}

impl std::error::Error for TaskError {}

/// Terminal outcome stored on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "value")]
pub enum TaskOutcome {
    Success(serde_json::Value),
    Failure(TaskError),
}

/// A single task in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    /// Tag used to resolve the executor.
    pub domain: String,
    /// Opaque text passed to the executor.
    pub description: String,
    /// Dependencies not yet completed.
    pub dependencies: BTreeSet<TaskId>,
    /// Tasks that list this one as a dependency.
    pub dependents: BTreeSet<TaskId>,
    pub status: TaskStatus,
    /// Present only once the task is terminal.
    pub result: Option<TaskOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    /// Create a pending task with empty dependency sets.
    pub fn new(id: impl Into<TaskId>, domain: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            domain: domain.to_string(),
            description: description.to_string(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Pending with no remaining dependencies.
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, payload: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(TaskOutcome::Success(payload));
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: TaskError) {
        self.status = TaskStatus::Failed;
        self.result = Some(TaskOutcome::Failure(error));
        self.finished_at = Some(Utc::now());
    }

    /// The executor payload, if the task completed.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.result {
            Some(TaskOutcome::Success(value)) => Some(value),
            _ => None,
        }
    }

    /// The failure reason, if the task failed.
    pub fn error(&self) -> Option<&TaskError> {
        match &self.result {
            Some(TaskOutcome::Failure(error)) => Some(error),
            _ => None,
        }
    }
}
