//! Combines the outcomes of a finished graph into one result.
//!
//! The rendered response keeps task insertion order so that the text reads
//! in the order the plan was written, regardless of completion order.

use crate::core::graph::TaskGraph;
use crate::core::task::{TaskError, TaskId, TaskNode, TaskStatus};
use serde::{Deserialize, Serialize};

/// Per-task record in an [`AggregatedResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub domain: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskReport {
    fn from_node(node: &TaskNode) -> Self {
        Self {
            id: node.id.clone(),
            domain: node.domain.clone(),
            status: node.status,
            payload: node.payload().cloned(),
            error: node.error().cloned(),
        }
    }

    /// The text this task contributes to the combined response.
    ///
    /// A string payload is used as-is. An object contributes its
    /// `"response"` string and nothing otherwise. Other values use their
    /// JSON text.
    fn text(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(format!("Task {} failed: {}", self.id, error));
        }
        let text = match self.payload.as_ref()? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map.get("response")?.as_str()?.to_string(),
            other => other.to_string(),
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// The combined response for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Per-task texts joined by blank lines.
    pub response: String,
    /// Every task in insertion order, completed and failed.
    pub tasks: Vec<TaskReport>,
}

impl AggregatedResult {
    pub fn succeeded(&self) -> Vec<&TaskReport> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect()
    }

    pub fn failed(&self) -> Vec<&TaskReport> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect()
    }

    /// True when there were tasks and none of them succeeded.
    pub fn is_total_failure(&self) -> bool {
        !self.tasks.is_empty() && self.succeeded().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id.as_str() == id)
    }
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the result for a graph whose tasks are all terminal.
    ///
    /// Tasks that are not terminal are reported with their status and no
    /// outcome, and contribute no text.
    pub fn aggregate(graph: &TaskGraph) -> AggregatedResult {
        let tasks: Vec<TaskReport> = graph.nodes().map(TaskReport::from_node).collect();
        let response = Self::render(&tasks);
        AggregatedResult { response, tasks }
    }

    /// Join the per-task texts with blank lines.
    pub fn render(tasks: &[TaskReport]) -> String {
        tasks
            .iter()
            .filter_map(TaskReport::text)
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string()
    }
}
