//! Domain executors and the registry that resolves them.
//!
//! The scheduler only ever asks a [`DomainRegistry`] for the executor behind
//! a domain tag. An absent domain is an ordinary answer (`None`), which the
//! scheduler turns into a `DomainUnavailable` task failure.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::core::task::TaskId;
use crate::orchestration::RequestId;

/// Error reported by an executor. Only the message is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutorError(pub String);

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ExecutorError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ExecutorError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Contextual data handed to an executor alongside the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub request_id: RequestId,
    pub task_id: TaskId,
    pub domain: String,
    /// Payloads of the task's direct dependencies.
    pub upstream: BTreeMap<TaskId, serde_json::Value>,
}

/// Performs the work for one domain.
///
/// Calls may be long-running; each runs on its own tokio task.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        description: &str,
        context: &TaskContext,
    ) -> std::result::Result<serde_json::Value, ExecutorError>;
}

/// Resolves domain tags to executors. Shared read-only across runs.
pub trait DomainRegistry: Send + Sync {
    fn resolve(&self, domain: &str) -> Option<Arc<dyn Executor>>;

    /// Registered domain tags, sorted.
    fn domains(&self) -> Vec<String>;
}

/// A map-backed registry, populated before runs start.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the domain.
    pub fn register(&mut self, domain: &str, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(domain.to_string(), executor);
        self
    }

    /// Register a closure as an executor.
    pub fn register_fn<F, Fut>(&mut self, domain: &str, f: F) -> &mut Self
    where
        F: Fn(String, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, ExecutorError>>
            + Send
            + 'static,
    {
        self.register(domain, Arc::new(FnExecutor::new(f)))
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.executors.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl DomainRegistry for ExecutorRegistry {
    fn resolve(&self, domain: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(domain).cloned()
    }

    fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.executors.keys().cloned().collect();
        domains.sort();
        domains
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}

type BoxedFn = dyn Fn(String, TaskContext) -> BoxFuture<'static, std::result::Result<serde_json::Value, ExecutorError>>
    + Send
    + Sync;

/// Adapts an async closure to [`Executor`].
pub struct FnExecutor {
    f: Box<BoxedFn>,
}

impl FnExecutor {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, ExecutorError>>
            + Send
            + 'static,
    {
        Self {
            f: Box::new(move |description, context| f(description, context).boxed()),
        }
    }
}

#[async_trait]
impl Executor for FnExecutor {
    async fn execute(
        &self,
        description: &str,
        context: &TaskContext,
    ) -> std::result::Result<serde_json::Value, ExecutorError> {
        (self.f)(description.to_string(), context.clone()).await
    }
}

/// Answers every task with `{"response": "[<domain>] <description>"}`.
///
/// Used for dry runs of a plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(
        &self,
        description: &str,
        context: &TaskContext,
    ) -> std::result::Result<serde_json::Value, ExecutorError> {
        Ok(serde_json::json!({
            "response": format!("[{}] {}", context.domain, description),
        }))
    }
}
