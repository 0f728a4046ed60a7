pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod registry;

pub use crate::core::{TaskError, TaskGraph, TaskId, TaskNode, TaskStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{
    AggregatedResult, FailurePolicy, Orchestrator, RequestId, Scheduler, SchedulerConfig,
    SchedulerEvent,
};
pub use plan::{Plan, SubtaskSpec};
pub use registry::{DomainRegistry, EchoExecutor, Executor, ExecutorError, ExecutorRegistry, TaskContext};
