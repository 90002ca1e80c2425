//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Pending -> Queued (submit)
/// - Queued -> Running (dispatcher hands the task to a free worker)
/// - Running -> Completed | Failed | Timeout
/// - Running -> Retrying -> Queued (failure with retry budget left, after backoff)
/// - Queued | Retrying | Running -> Cancelled
///
/// Timeout is terminal and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Constructed, not submitted yet.
    Pending,

    /// Waiting in the priority queue.
    Queued,

    /// Claimed by a worker.
    Running,

    /// Last attempt failed; waiting out the backoff before re-queueing.
    Retrying,

    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
