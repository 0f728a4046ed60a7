use thiserror::Error;

use crate::core::task::TaskStatus;
use crate::orchestration::RequestId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Unknown task id: {0}")]
    UnknownTaskId(String),

    #[error("Invalid dependency: task {0} cannot depend on itself")]
    InvalidDependency(String),

    #[error("Invalid state for task {id}: {status}")]
    InvalidState { id: String, status: TaskStatus },

    #[error("Deadlock: {} task(s) can never run ({})", .stalled.len(), .stalled.join(", "))]
    Deadlock {
        /// Tasks left pending when the run stalled.
        stalled: Vec<String>,
        /// Dependency cycles found among the stalled tasks, if any.
        cycles: Vec<Vec<String>>,
    },

    #[error("Run cancelled: {0}")]
    Cancelled(RequestId),

    #[error("Run already active: {0}")]
    RunExists(RequestId),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
