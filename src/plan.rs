//! Subtask plans produced by an external decomposition step.
//!
//! A planner typically answers with prose around a JSON document. `Plan`
//! accepts the bare document, a fenced ```json block, or the first `{...}`
//! object embedded in the text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::rlog_debug;

/// One declared subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub id: String,
    pub domain: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl SubtaskSpec {
    pub fn new(id: &str, domain: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            domain: domain.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
        }
    }

    /// Add dependencies by id.
    pub fn after(mut self, dependencies: &[&str]) -> Self {
        self.dependencies
            .extend(dependencies.iter().map(|d| d.to_string()));
        self
    }
}

/// An ordered list of subtasks for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub subtasks: Vec<SubtaskSpec>,
}

impl Plan {
    pub fn new(subtasks: Vec<SubtaskSpec>) -> Self {
        Self { subtasks }
    }

    /// The fallback plan: one task carrying the original request verbatim.
    pub fn single(request: &str, domain: &str) -> Self {
        Self {
            subtasks: vec![SubtaskSpec::new("task1", domain, request)],
        }
    }

    /// Extract a plan from planner output.
    ///
    /// Returns `None` when no candidate document decodes as a plan.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Ok(plan) = serde_json::from_str::<Plan>(trimmed) {
            return Some(plan);
        }

        if let Some(captures) = FENCED_JSON_RE.captures(text) {
            match serde_json::from_str::<Plan>(captures[1].trim()) {
                Ok(plan) => return Some(plan),
                Err(e) => rlog_debug!("Plan::parse fenced block rejected: {}", e),
            }
        }

        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        match serde_json::from_str::<Plan>(&text[start..=end]) {
            Ok(plan) => Some(plan),
            Err(e) => {
                rlog_debug!("Plan::parse embedded object rejected: {}", e);
                None
            }
        }
    }

    /// Parse planner output, falling back to a single-task plan.
    pub fn parse_or_single(text: &str, request: &str, domain: &str) -> Self {
        Self::parse(text)
            .filter(|plan| !plan.is_empty())
            .unwrap_or_else(|| Self::single(request, domain))
    }

    /// Every distinct domain named by the plan, in first-seen order.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();
        for subtask in &self.subtasks {
            if !domains.contains(&subtask.domain) {
                domains.push(subtask.domain.clone());
            }
        }
        domains
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }
}

/// Regex for a fenced code block, optionally tagged `json`
static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").unwrap()
});
