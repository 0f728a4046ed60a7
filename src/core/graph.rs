//! Task dependency graph.
//!
//! `TaskGraph` stores nodes in a petgraph `DiGraph` arena addressed by
//! `NodeIndex`, with an id index for lookups. Edges point from a dependency
//! to its dependent. Each node also carries the set of dependencies still
//! outstanding, which shrinks as dependencies complete.

use crate::core::task::{TaskError, TaskId, TaskNode, TaskStatus};
use crate::error::{Error, Result};
use crate::plan::Plan;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// The task dependency graph for a single request.
///
/// Populated once, mutated by the scheduler during the run, then discarded.
pub struct TaskGraph {
    /// Arena of nodes; edges run dependency -> dependent.
    graph: DiGraph<TaskNode, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build a graph from a plan.
    ///
    /// All tasks are added first, then all dependencies, so a subtask may
    /// reference one declared after it. Any structural error aborts the
    /// whole construction.
    pub fn from_plan(plan: &Plan) -> Result<Self> {
        let mut graph = Self::new();
        for subtask in &plan.subtasks {
            graph.add_task(subtask.id.as_str(), &subtask.domain, &subtask.description)?;
        }
        for subtask in &plan.subtasks {
            for dependency in &subtask.dependencies {
                graph.add_dependency(&subtask.id, dependency)?;
            }
        }
        Ok(graph)
    }

    /// Add a pending task.
    ///
    /// # Errors
    /// `DuplicateTaskId` if a task with this id already exists.
    pub fn add_task(
        &mut self,
        id: impl Into<TaskId>,
        domain: &str,
        description: &str,
    ) -> Result<NodeIndex> {
        let id = id.into();
        if self.task_index.contains_key(&id) {
            return Err(Error::DuplicateTaskId(id.0));
        }

        let index = self
            .graph
            .add_node(TaskNode::new(id.clone(), domain, description));
        self.task_index.insert(id, index);
        Ok(index)
    }

    /// Record that `dependent` must wait for `dependency`.
    ///
    /// # Errors
    /// - `InvalidDependency` if both ids are the same task
    /// - `UnknownTaskId` if either task is not in the graph
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        if dependent == dependency {
            return Err(Error::InvalidDependency(dependent.to_string()));
        }

        let dependent_index = self.index_of(dependent)?;
        let dependency_index = self.index_of(dependency)?;

        self.graph[dependent_index]
            .dependencies
            .insert(TaskId::from(dependency));
        self.graph[dependency_index]
            .dependents
            .insert(TaskId::from(dependent));

        if self
            .graph
            .find_edge(dependency_index, dependent_index)
            .is_none()
        {
            self.graph.add_edge(dependency_index, dependent_index, ());
        }

        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownTaskId(id.to_string()))
    }

    /// Get a task by its ID.
    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get the NodeIndex for a task by its ID.
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.task_index.get(id).copied()
    }

    /// All tasks in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Ids of the tasks that depend on `id`, in insertion order.
    pub fn dependents_of(&self, id: &str) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .sorted_neighbors(index, Direction::Outgoing)
                .into_iter()
                .map(|n| self.graph[n].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ids of every task `id` was declared to depend on, completed or not.
    pub fn dependencies_of(&self, id: &str) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .sorted_neighbors(index, Direction::Incoming)
                .into_iter()
                .map(|n| self.graph[n].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn sorted_neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort();
        neighbors
    }

    // ========== Scheduling Operations ==========

    /// Pending tasks with no outstanding dependencies, in insertion order.
    pub fn ready_tasks(&self) -> Vec<&TaskNode> {
        self.graph.node_weights().filter(|t| t.is_ready()).collect()
    }

    /// Transition a ready task to in-progress ahead of dispatch.
    ///
    /// # Errors
    /// `InvalidState` unless the task is pending with no dependencies left.
    pub fn mark_in_progress(&mut self, id: &str) -> Result<()> {
        let index = self.index_of(id)?;
        let node = &mut self.graph[index];
        if !node.is_ready() {
            return Err(Error::InvalidState {
                id: id.to_string(),
                status: node.status,
            });
        }
        node.start();
        Ok(())
    }

    /// Mark a task completed and release its dependents.
    ///
    /// Returns the dependents that became ready as a result, in insertion
    /// order.
    ///
    /// # Errors
    /// - `UnknownTaskId` if the task is not in the graph
    /// - `InvalidState` if the task is already terminal or still blocked
    pub fn mark_completed(&mut self, id: &str, payload: serde_json::Value) -> Result<Vec<TaskId>> {
        let index = self.index_of(id)?;
        self.check_can_finish(index)?;
        self.graph[index].complete(payload);

        // Owned index list: dependents are updated one by one through the
        // arena, never through a live iterator.
        let mut newly_ready = Vec::new();
        for dependent in self.sorted_neighbors(index, Direction::Outgoing) {
            let node = &mut self.graph[dependent];
            node.dependencies.remove(id);
            if node.is_ready() {
                newly_ready.push(node.id.clone());
            }
        }
        Ok(newly_ready)
    }

    /// Mark a task failed.
    ///
    /// Dependents are left untouched; their dependency sets still name this
    /// task. See [`TaskGraph::propagate_failure`].
    ///
    /// # Errors
    /// - `UnknownTaskId` if the task is not in the graph
    /// - `InvalidState` if the task is already terminal or still blocked
    pub fn mark_failed(&mut self, id: &str, error: TaskError) -> Result<()> {
        let index = self.index_of(id)?;
        self.check_can_finish(index)?;
        self.graph[index].fail(error);
        Ok(())
    }

    fn check_can_finish(&self, index: NodeIndex) -> Result<()> {
        let node = &self.graph[index];
        if node.is_finished() || !node.dependencies.is_empty() {
            return Err(Error::InvalidState {
                id: node.id.0.clone(),
                status: node.status,
            });
        }
        Ok(())
    }

    /// Fail every transitive dependent of a failed task.
    ///
    /// Each dependent is failed with `DependencyFailed` naming the dependency
    /// that failed directly before it, and its outstanding dependency set is
    /// cleared. Returns the ids failed, in breadth-first order.
    pub fn propagate_failure(&mut self, id: &str) -> Result<Vec<TaskId>> {
        let root = self.index_of(id)?;
        let mut failed = Vec::new();
        let mut queue = VecDeque::from([root]);

        while let Some(index) = queue.pop_front() {
            let cause = self.graph[index].id.clone();
            for dependent in self.sorted_neighbors(index, Direction::Outgoing) {
                let node = &mut self.graph[dependent];
                if node.status != TaskStatus::Pending {
                    continue;
                }
                node.dependencies.clear();
                node.fail(TaskError::DependencyFailed {
                    dependency: cause.clone(),
                });
                failed.push(node.id.clone());
                queue.push_back(dependent);
            }
        }
        Ok(failed)
    }

    /// True when every task is completed or failed.
    pub fn is_complete(&self) -> bool {
        self.graph.node_weights().all(|t| t.is_finished())
    }

    /// Payloads of completed tasks. Failed tasks are excluded.
    pub fn results(&self) -> HashMap<TaskId, serde_json::Value> {
        self.graph
            .node_weights()
            .filter_map(|t| t.payload().map(|p| (t.id.clone(), p.clone())))
            .collect()
    }

    /// Failed tasks with their errors, in insertion order.
    pub fn failures(&self) -> Vec<(TaskId, TaskError)> {
        self.graph
            .node_weights()
            .filter_map(|t| t.error().map(|e| (t.id.clone(), e.clone())))
            .collect()
    }

    /// Ids of tasks that are still pending, in insertion order.
    pub fn pending(&self) -> Vec<TaskId> {
        self.graph
            .node_weights()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Count of tasks in the given status.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.graph
            .node_weights()
            .filter(|t| t.status == status)
            .count()
    }

    /// Tasks in an order where each comes after all of its dependencies.
    ///
    /// # Errors
    /// `Validation` if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<&TaskNode>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.id.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", id))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Dependency cycles, each listed in insertion order.
    pub fn find_cycles(&self) -> Vec<Vec<TaskId>> {
        let mut cycles: Vec<Vec<TaskId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|mut component| {
                component.sort();
                component
                    .into_iter()
                    .map(|index| self.graph[index].id.clone())
                    .collect()
            })
            .collect();
        cycles.sort();
        cycles
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
