//! Core data model: tasks and the dependency graph they form.

pub mod graph;
pub mod task;

pub use graph::TaskGraph;
pub use task::{TaskError, TaskId, TaskNode, TaskOutcome, TaskStatus};
