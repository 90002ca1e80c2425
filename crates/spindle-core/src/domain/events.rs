//! Domain events emitted on every status transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, status: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status,
            at,
        }
    }
}
