//! Task record: identity + schedulable parameters + mutable outcome envelope.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{Priority, TaskId, TaskStatus, TaskType};
use crate::error::ExecutorError;
use crate::runtime::{FnExecutor, TaskContext, TaskExecutor};

/// One unit of schedulable work.
///
/// Design:
/// - The caller builds it (status `Pending`) and owns it until `submit`.
/// - `created_at` is provisional until `submit` restamps it from the
///   scheduler's clock, so every lifecycle timestamp shares one time source.
/// - After `submit`, only the scheduler mutates it, through the transition
///   methods below, always under the registry lock.
/// - Outcome fields are written before `status` flips, so anyone who observes
///   a terminal status also observes the final `result`/`error`.
#[derive(Clone)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) task_type: TaskType,
    pub(crate) priority: Priority,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_retries: u32,
    pub(crate) retry_count: u32,
    pub(crate) status: TaskStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) progress: u8,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) output: Vec<String>,

    /// Ad-hoc function used when no executor is registered for `task_type`.
    pub(crate) function: Option<Arc<dyn TaskExecutor>>,
}

impl Task {
    pub fn new(name: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            task_type: task_type.into(),
            priority: Priority::default(),
            timeout: None,
            max_retries: 0,
            retry_count: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            result: None,
            error: None,
            metadata: Map::new(),
            output: Vec::new(),
            function: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Add one entry to the metadata bag handed to the executor verbatim.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach an ad-hoc function. The metadata bag doubles as its arguments.
    pub fn with_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
    {
        self.function = Some(Arc::new(FnExecutor::new(f)));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    // ---- transitions (scheduler side) ----

    /// Accepted by the scheduler.
    pub(crate) fn mark_submitted(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.status = TaskStatus::Queued;
    }

    pub(crate) fn mark_queued(&mut self) {
        self.status = TaskStatus::Queued;
    }

    /// Claimed by a worker. `started_at` keeps the first attempt's time.
    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.started_at.get_or_insert(now);
        self.status = TaskStatus::Running;
    }

    pub(crate) fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consume one retry. Returns the new `retry_count`.
    pub(crate) fn schedule_retry(&mut self, error: String) -> u32 {
        self.retry_count += 1;
        self.error = Some(error);
        self.status = TaskStatus::Retrying;
        self.retry_count
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>, result: Value) {
        self.result = Some(result);
        self.error = None;
        self.progress = 100;
        self.completed_at = Some(now);
        self.status = TaskStatus::Completed;
    }

    pub(crate) fn mark_failed(&mut self, now: DateTime<Utc>, error: String) {
        self.result = None;
        self.error = Some(error);
        self.completed_at = Some(now);
        self.status = TaskStatus::Failed;
    }

    pub(crate) fn mark_timed_out(&mut self, now: DateTime<Utc>, limit: Duration) {
        self.result = None;
        self.error = Some(format!("timed out after {limit:?}"));
        self.completed_at = Some(now);
        self.status = TaskStatus::Timeout;
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.result = None;
        self.completed_at = Some(now);
        self.status = TaskStatus::Cancelled;
    }

    /// Progress never goes backwards and stays below 100 until completion.
    pub(crate) fn record_progress(&mut self, percent: u8) {
        if self.status == TaskStatus::Running {
            self.progress = self.progress.max(percent.min(99));
        }
    }

    pub(crate) fn push_output(&mut self, line: String) {
        self.output.push(line);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("has_function", &self.function.is_some())
            .finish_non_exhaustive()
    }
}
