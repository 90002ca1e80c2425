//! TaskManager - 外部に公開する facade
//!
//! 投入 / 状態参照 / キャンセル / 統計 / シャットダウン をまとめる。
//! 内部状態は Engine が持ち、ここは lifecycle（ループの停止と待ち合わせ）を管理する。

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use super::builder::ManagerBuilder;
use super::engine::Engine;
use crate::domain::{Task, TaskEvent, TaskId, TaskSnapshot, TaskType};
use crate::error::SchedulerError;
use crate::observability::SchedulerStats;
use crate::ports::EventSink;

/// Upper bound on one sleep while draining the queue on shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Handle to a running scheduler.
///
/// Created by [`ManagerBuilder::build`], which also starts the dispatcher and
/// cleanup loops. Call [`TaskManager::shutdown`] to stop them in an orderly
/// way; dropping the manager only signals the loops to exit.
pub struct TaskManager {
    pub(crate) engine: Arc<Engine>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) loops: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) shut_down: AtomicBool,
}

impl TaskManager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Hand a task to the scheduler. It is QUEUED when this returns.
    pub fn submit(&self, mut task: Task) -> Result<TaskId, SchedulerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        if task.timeout.is_none() {
            task.timeout = self.engine.config.default_timeout;
        }

        let priority = task.priority();
        let task_type = task.task_type().clone();
        let task_id = self.engine.registry.submit(task, &self.engine.queue)?;
        info!(
            task_id = %task_id,
            task_type = %task_type,
            priority = %priority,
            "task submitted"
        );
        Ok(task_id)
    }

    /// Snapshot of a task, active or completed. `None` if unknown or evicted.
    pub fn get_status(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.engine.registry.snapshot(task_id)
    }

    /// In-flight tasks, oldest first.
    pub fn get_active(&self) -> Vec<TaskSnapshot> {
        self.engine.registry.active_snapshots()
    }

    /// Terminal tasks still retained, in completion order.
    pub fn get_completed(&self) -> Vec<TaskSnapshot> {
        self.engine.registry.completed_snapshots()
    }

    /// Request cancellation. `false` if the task is unknown or already terminal.
    ///
    /// A task that has not started yet will never run. A running task is
    /// marked CANCELLED right away and its executor sees the cancellation
    /// token fire; whatever it returns afterwards is discarded.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let cancelled = self.engine.registry.cancel(task_id, &self.engine.queue);
        if cancelled {
            info!(task_id = %task_id, "task cancelled");
        }
        cancelled
    }

    pub fn get_statistics(&self) -> SchedulerStats {
        self.engine
            .registry
            .stats(&self.engine.queue, self.engine.pool.size())
    }

    /// Wait until the task reaches a terminal state, or `timeout` passes.
    /// Returns the latest snapshot either way (`None` if the id is unknown).
    pub async fn wait_for(&self, task_id: &TaskId, timeout: Duration) -> Option<TaskSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.engine.registry.terminal_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = self.get_status(task_id)?;
            if snapshot.is_terminal() {
                return Some(snapshot);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get_status(task_id);
            }
        }
    }

    /// Run one eviction pass now instead of waiting for the cleanup loop.
    pub fn run_cleanup(&self) -> usize {
        self.engine.cleanup()
    }

    /// Status-change events, if the manager was built with a broadcasting sink.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<TaskEvent>> {
        self.events.subscribe()
    }

    pub fn registered_task_types(&self) -> Vec<TaskType> {
        self.engine.executors.registered_types()
    }

    pub fn worker_count(&self) -> usize {
        self.engine.pool.size()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the scheduler.
    ///
    /// 1. No new submissions are accepted.
    /// 2. If `wait`, keep dispatching until the queue is empty.
    /// 3. Stop the loops and interrupt retry backoffs.
    /// 4. Give running attempts until the deadline to finish.
    /// 5. Cancel whatever is still active.
    ///
    /// `timeout` bounds the whole call. Calling it again is a no-op.
    pub async fn shutdown(&self, wait: bool, timeout: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + timeout;
        info!(wait, timeout = ?timeout, "shutting down");

        if wait {
            while !self.engine.queue.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    warn!(
                        queued = self.engine.queue.len(),
                        "shutdown deadline reached before the queue drained"
                    );
                    break;
                }
                tokio::time::sleep(DRAIN_POLL.min(deadline - now)).await;
            }
        }

        self.engine.stop.cancel();
        let loops = mem::take(&mut *self.loops.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in loops {
            // ループは stop を見てすぐ抜ける。panic していても shutdown は続ける
            let _ = handle.await;
        }

        if !self.engine.pool.shutdown(deadline).await {
            warn!(
                running = self.engine.pool.busy(),
                "workers still running at shutdown deadline"
            );
        }

        let cancelled = self.engine.registry.cancel_all(&self.engine.queue);
        info!(cancelled = cancelled.len(), "shutdown complete");
    }

    /// `shutdown(true, config.shutdown_timeout)`.
    pub async fn shutdown_default(&self) {
        self.shutdown(true, self.engine.config.shutdown_timeout).await
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.engine.stop.cancel();
    }
}
