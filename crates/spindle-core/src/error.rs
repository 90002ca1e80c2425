use thiserror::Error;

use crate::domain::{TaskId, TaskType};

/// Errors reported by the manager facade and its builder.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate executor for task_type={0}")]
    DuplicateExecutor(TaskType),

    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("task {0} is already tracked by the scheduler")]
    AlreadySubmitted(TaskId),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no tokio runtime available to start the scheduler loops")]
    NoRuntime,
}

/// Failure raised by a task executor.
///
/// Every variant is treated as an executor failure and is subject to the
/// retry budget. The `Display` form is what ends up in the task's `error`.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("no executor registered for task_type={0}")]
    UnknownTaskType(TaskType),

    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<std::io::Error> for ExecutorError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(format!("json decode: {err}"))
    }
}
