//! TaskRegistry - active / completed の正本（source of truth）
//!
//! # 設計
//! - active と completed の 2 つの map を 1 つの Mutex で守る（非再入）
//! - クリティカルセクションはネストしない。ロック中に await しない
//! - ロック順序は registry -> queue のみ（queue 側から registry は触らない）
//! - task id は常に active / completed のどちらか一方にだけ存在する

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio_util::sync::CancellationToken;

use crate::domain::{Task, TaskEvent, TaskId, TaskSnapshot, TaskStatus, TaskType};
use crate::error::SchedulerError;
use crate::observability::SchedulerStats;
use crate::ports::{Clock, EventSink};
use crate::queue::PriorityQueue;
use crate::runtime::TaskExecutor;

/// An in-flight task plus its execution handle.
struct ActiveEntry {
    task: Task,
    token: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<TaskId, ActiveEntry>,
    completed: HashMap<TaskId, Task>,
}

impl RegistryState {
    /// Move a task from active to completed.
    fn retire(&mut self, task_id: &TaskId) {
        if let Some(entry) = self.active.remove(task_id) {
            self.completed.insert(*task_id, entry.task);
        }
    }
}

/// Everything a worker needs to run one attempt, copied out under the lock.
pub(crate) struct Claim {
    pub name: String,
    pub task_type: TaskType,
    pub metadata: Arc<Map<String, Value>>,
    pub attempt: u32,
    pub timeout: Option<Duration>,
    pub function: Option<Arc<dyn TaskExecutor>>,
    pub token: CancellationToken,
}

/// How one attempt ended, as seen by the worker.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Succeeded(Value),
    Failed(String),
    TimedOut(Duration),
}

/// What the registry decided to do with an attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Reached a terminal state.
    Settled(TaskStatus),
    /// Budget left: back off, then re-queue.
    Retry { retry_count: u32 },
    /// Task was cancelled (or evicted) meanwhile; the outcome is dropped.
    Discarded,
}

pub(crate) struct TaskRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    /// Woken whenever a task becomes terminal.
    terminal: Notify,
}

impl TaskRegistry {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            clock,
            events,
            terminal: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, task_id: TaskId, status: TaskStatus, at: DateTime<Utc>) {
        self.events.emit(&TaskEvent::new(task_id, status, at));
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Pending -> Queued. The queue push happens under the same lock.
    /// `created_at` is restamped from the registry clock.
    pub fn submit(&self, mut task: Task, queue: &PriorityQueue) -> Result<TaskId, SchedulerError> {
        let task_id = task.id();
        let now = self.clock.now();
        let mut state = self.lock();
        if state.active.contains_key(&task_id) || state.completed.contains_key(&task_id) {
            return Err(SchedulerError::AlreadySubmitted(task_id));
        }

        task.mark_submitted(now);
        queue.push(task_id, task.priority(), task.created_at());
        state.active.insert(
            task_id,
            ActiveEntry {
                task,
                token: CancellationToken::new(),
            },
        );
        self.emit(task_id, TaskStatus::Queued, now);
        Ok(task_id)
    }

    /// Queued -> Running. `None` if the task is no longer eligible
    /// (cancelled between pop and claim).
    pub fn claim(&self, task_id: &TaskId) -> Option<Claim> {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state.active.get_mut(task_id)?;
        if entry.task.status() != TaskStatus::Queued {
            return None;
        }

        entry.task.start_attempt(now);
        let task = &entry.task;
        let claim = Claim {
            name: task.name.clone(),
            task_type: task.task_type.clone(),
            metadata: Arc::new(task.metadata.clone()),
            attempt: task.retry_count + 1,
            timeout: task.timeout,
            function: task.function.clone(),
            token: entry.token.clone(),
        };
        self.emit(*task_id, TaskStatus::Running, now);
        Some(claim)
    }

    /// Record an attempt's outcome and decide where the task goes next.
    pub fn finish(&self, task_id: &TaskId, outcome: AttemptOutcome) -> Disposition {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(entry) = state.active.get_mut(task_id) else {
            return Disposition::Discarded;
        };

        if entry.task.status() != TaskStatus::Running {
            // Cancelled while running: keep the CANCELLED record, drop the outcome.
            if entry.task.status().is_terminal() {
                state.retire(task_id);
                self.terminal.notify_waiters();
            }
            return Disposition::Discarded;
        }

        let task = &mut entry.task;
        let disposition = match outcome {
            AttemptOutcome::Succeeded(result) => {
                task.mark_completed(now, result);
                Disposition::Settled(TaskStatus::Completed)
            }
            AttemptOutcome::TimedOut(limit) => {
                task.mark_timed_out(now, limit);
                Disposition::Settled(TaskStatus::Timeout)
            }
            AttemptOutcome::Failed(error) if task.can_retry() => Disposition::Retry {
                retry_count: task.schedule_retry(error),
            },
            AttemptOutcome::Failed(error) => {
                task.mark_failed(now, error);
                Disposition::Settled(TaskStatus::Failed)
            }
        };

        let status = task.status();
        self.emit(*task_id, status, now);
        if status.is_terminal() {
            state.retire(task_id);
            self.terminal.notify_waiters();
        }
        disposition
    }

    /// Retrying -> Queued after the backoff. `false` if the task was
    /// cancelled in the meantime.
    pub fn requeue(&self, task_id: &TaskId, queue: &PriorityQueue) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(entry) = state.active.get_mut(task_id) else {
            return false;
        };
        if entry.task.status() != TaskStatus::Retrying {
            return false;
        }

        entry.task.mark_queued();
        queue.push(*task_id, entry.task.priority(), entry.task.created_at());
        self.emit(*task_id, TaskStatus::Queued, now);
        true
    }

    /// Best-effort cancellation.
    ///
    /// - Queued / Retrying: leaves the queue and settles as CANCELLED at once.
    /// - Running: flagged CANCELLED and its token fired; the record moves to
    ///   completed when the worker gets back.
    pub fn cancel(&self, task_id: &TaskId, queue: &PriorityQueue) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        let cancelled = Self::cancel_locked(&mut state, task_id, queue, now);
        if cancelled {
            self.emit(*task_id, TaskStatus::Cancelled, now);
            self.terminal.notify_waiters();
        }
        cancelled
    }

    /// Cancel everything still in flight (shutdown). Returns the ids touched.
    pub fn cancel_all(&self, queue: &PriorityQueue) -> Vec<TaskId> {
        let now = self.clock.now();
        let mut state = self.lock();
        let ids: Vec<TaskId> = state.active.keys().copied().collect();
        let cancelled: Vec<TaskId> = ids
            .into_iter()
            .filter(|id| Self::cancel_locked(&mut state, id, queue, now))
            .collect();
        for id in &cancelled {
            self.emit(*id, TaskStatus::Cancelled, now);
        }
        if !cancelled.is_empty() {
            self.terminal.notify_waiters();
        }
        cancelled
    }

    fn cancel_locked(
        state: &mut RegistryState,
        task_id: &TaskId,
        queue: &PriorityQueue,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = state.active.get_mut(task_id) else {
            return false;
        };
        let status = entry.task.status();
        if status.is_terminal() {
            return false;
        }

        entry.token.cancel();
        entry.task.mark_cancelled(now);
        if status != TaskStatus::Running {
            queue.remove(task_id);
            state.retire(task_id);
        }
        true
    }

    pub fn record_progress(&self, task_id: &TaskId, percent: u8) {
        if let Some(entry) = self.lock().active.get_mut(task_id) {
            entry.task.record_progress(percent);
        }
    }

    pub fn append_output(&self, task_id: &TaskId, line: String) {
        if let Some(entry) = self.lock().active.get_mut(task_id) {
            entry.task.push_output(line);
        }
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.lock();
        state
            .active
            .get(task_id)
            .map(|entry| TaskSnapshot::from(&entry.task))
            .or_else(|| state.completed.get(task_id).map(TaskSnapshot::from))
    }

    pub fn active_snapshots(&self) -> Vec<TaskSnapshot> {
        let state = self.lock();
        let mut snapshots: Vec<TaskSnapshot> = state
            .active
            .values()
            .map(|entry| TaskSnapshot::from(&entry.task))
            .collect();
        snapshots.sort_by_key(|s| (s.created_at, s.id));
        snapshots
    }

    pub fn completed_snapshots(&self) -> Vec<TaskSnapshot> {
        let state = self.lock();
        let mut snapshots: Vec<TaskSnapshot> =
            state.completed.values().map(TaskSnapshot::from).collect();
        snapshots.sort_by_key(|s| (s.completed_at, s.id));
        snapshots
    }

    pub fn stats(&self, queue: &PriorityQueue, workers: usize) -> SchedulerStats {
        let state = self.lock();
        let mut stats = SchedulerStats {
            active: state.active.len(),
            completed: state.completed.len(),
            queue_depth: queue.len(),
            workers,
            ..Default::default()
        };
        for entry in state.active.values() {
            match entry.task.status() {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Retrying => stats.retrying += 1,
                _ => {}
            }
        }
        for task in state.completed.values() {
            match task.status() {
                TaskStatus::Completed => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Timeout => stats.timed_out += 1,
                _ => {}
            }
        }
        stats
    }

    /// Drop every completed task whose `completed_at` precedes `cutoff`.
    pub fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.completed.len();
        state
            .completed
            .retain(|_, task| task.completed_at.is_none_or(|at| at >= cutoff));
        before - state.completed.len()
    }

    pub fn terminal_notified(&self) -> Notified<'_> {
        self.terminal.notified()
    }

    /// `(in active, in completed)`, read under one lock.
    #[cfg(test)]
    fn membership(&self, task_id: &TaskId) -> (bool, bool) {
        let state = self.lock();
        (
            state.active.contains_key(task_id),
            state.completed.contains_key(task_id),
        )
    }
}
