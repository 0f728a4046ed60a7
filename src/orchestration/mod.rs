//! Run orchestration for relay.
//!
//! The [`Scheduler`] drives one graph to completion, the
//! [`ResultAggregator`] combines its outcomes, and the [`Orchestrator`]
//! keeps the table of active runs so they can be cancelled.

mod aggregator;
mod orchestrator;
mod scheduler;

pub use aggregator::{AggregatedResult, ResultAggregator, TaskReport};
pub use orchestrator::{Orchestrator, RequestId};
pub use scheduler::{FailurePolicy, RunState, Scheduler, SchedulerConfig, SchedulerEvent};
