//! Request-level entry point.
//!
//! The `Orchestrator` turns a plan (or raw planner output) into a graph,
//! runs it on a fresh [`Scheduler`] and keeps a table of active runs so that
//! any of them can be cancelled by id. Concurrent runs share the registry
//! and nothing else.

use crate::config::Config;
use crate::core::graph::TaskGraph;
use crate::error::{Error, Result};
use crate::orchestration::aggregator::AggregatedResult;
use crate::orchestration::scheduler::{Scheduler, SchedulerEvent};
use crate::plan::Plan;
use crate::registry::DomainRegistry;
use crate::{rlog, rlog_debug, rlog_warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier of one orchestration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for logs.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

type RunTable = Arc<RwLock<HashMap<RequestId, CancellationToken>>>;

// Never held across an await. Every critical section is a single map
// operation, so a poisoned table is still consistent.
fn read_runs(runs: &RunTable) -> RwLockReadGuard<'_, HashMap<RequestId, CancellationToken>> {
    runs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_runs(runs: &RunTable) -> RwLockWriteGuard<'_, HashMap<RequestId, CancellationToken>> {
    runs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An entry in the run table, removed when dropped.
///
/// Dropping covers every way a run can end, including the caller dropping
/// the run future before it resolves.
struct RunRecord {
    runs: RunTable,
    request_id: RequestId,
}

impl RunRecord {
    fn register(runs: &RunTable, request_id: RequestId, cancel: CancellationToken) -> Result<Self> {
        let mut table = write_runs(runs);
        if table.contains_key(&request_id) {
            return Err(Error::RunExists(request_id));
        }
        table.insert(request_id, cancel);
        Ok(Self {
            runs: Arc::clone(runs),
            request_id,
        })
    }
}

impl Drop for RunRecord {
    fn drop(&mut self) {
        write_runs(&self.runs).remove(&self.request_id);
        rlog_debug!("Run {}: record released", self.request_id.short());
    }
}

/// Runs requests against a shared registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn DomainRegistry>,
    config: Config,
    runs: RunTable,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<dyn DomainRegistry>, config: Config) -> Self {
        Self {
            registry,
            config,
            runs: Arc::new(RwLock::new(HashMap::new())),
            event_tx: None,
        }
    }

    /// Forward every run's scheduler events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run an already-built graph to completion.
    ///
    /// # Errors
    /// - `RunExists` if `request_id` is already running
    /// - `Deadlock` or `Cancelled` from the scheduler
    pub async fn run_graph(
        &self,
        request_id: RequestId,
        graph: TaskGraph,
    ) -> Result<AggregatedResult> {
        let cancel = CancellationToken::new();
        let _record = RunRecord::register(&self.runs, request_id, cancel.clone())?;

        let mut scheduler = Scheduler::new(
            request_id,
            graph,
            Arc::clone(&self.registry),
            self.config.scheduler_config(),
        )
        .with_cancellation(cancel);
        if let Some(tx) = &self.event_tx {
            scheduler = scheduler.with_events(tx.clone());
        }

        scheduler.run().await
    }

    /// Validate `plan` and run it. Structural errors are returned as-is.
    pub async fn run_plan(&self, request_id: RequestId, plan: &Plan) -> Result<AggregatedResult> {
        let graph = TaskGraph::from_plan(plan)?;
        self.run_graph(request_id, graph).await
    }

    /// Handle a request given the planner's raw output.
    ///
    /// When the output holds no usable plan, or the plan is structurally
    /// invalid, the request runs as a single task on the fallback domain.
    pub async fn handle(
        &self,
        request_id: RequestId,
        request: &str,
        planner_output: &str,
    ) -> Result<AggregatedResult> {
        let fallback_domain = self.config.fallback_domain_for(request);
        let plan = Plan::parse_or_single(planner_output, request, fallback_domain);
        let graph = match TaskGraph::from_plan(&plan) {
            Ok(graph) => graph,
            Err(e) => {
                rlog_warn!(
                    "Run {}: plan rejected ({}), running as a single task on '{}'",
                    request_id.short(),
                    e,
                    fallback_domain
                );
                TaskGraph::from_plan(&Plan::single(request, fallback_domain))?
            }
        };
        rlog!(
            "Run {}: handling request with {} task(s)",
            request_id.short(),
            graph.len()
        );
        self.run_graph(request_id, graph).await
    }

    /// Cancel a running request. Returns false if it is not active.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        match read_runs(&self.runs).get(&request_id) {
            Some(token) => {
                rlog!("Run {}: cancellation requested", request_id.short());
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_runs(&self) -> Vec<RequestId> {
        read_runs(&self.runs).keys().copied().collect()
    }

    pub fn is_active(&self, request_id: RequestId) -> bool {
        read_runs(&self.runs).contains_key(&request_id)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("domains", &self.registry.domains())
            .field("config", &self.config)
            .finish()
    }
}
