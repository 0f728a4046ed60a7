//! Integration test suite for relay.
//!
//! These tests drive whole runs through the public API with mock
//! executors, from plan to aggregated result.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full runs from plan or planner output to response
//! - `failure_isolation`: Failed tasks under each failure policy
//! - `deadlock`: Cycles and blocked dependents end the run, never hang
//! - `cancellation`: Cancelling active runs through the orchestrator
//! - `limits`: Timeouts and the concurrency cap
//!
//! # CI Compatibility
//!
//! No executor here performs real work or I/O.

mod fixtures;

mod cancellation;
mod deadlock;
mod limits;
