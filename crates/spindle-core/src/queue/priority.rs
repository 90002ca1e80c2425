//! Unbounded priority queue of task ids.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{Priority, TaskId};

/// Ordering key: priority first, then creation time, then insertion order.
///
/// `seq` only matters when two tasks share both priority and `created_at`
/// (same clock tick); it keeps the tie-break FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Priority,
    created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    /// Min-ordered entries; the first key is the next task to dispatch.
    entries: BTreeMap<QueueKey, TaskId>,

    /// Reverse index so a cancelled task can be pulled out in O(log n).
    index: HashMap<TaskId, QueueKey>,

    next_seq: u64,
}

/// Priority queue (thread-safe, independent of the registry lock).
///
/// Design:
/// - Holds TaskIds only; the task record lives in the registry.
/// - `push` / `try_pop` / `remove` are O(log n).
/// - `pop` waits at most one poll interval so the dispatcher can re-check
///   its shutdown signal.
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task. Returns `false` if it is already queued.
    pub fn push(&self, task_id: TaskId, priority: Priority, created_at: DateTime<Utc>) -> bool {
        {
            let mut state = self.lock();
            if state.index.contains_key(&task_id) {
                return false;
            }
            let key = QueueKey {
                priority,
                created_at,
                seq: state.next_seq,
            };
            state.next_seq += 1;
            state.entries.insert(key, task_id);
            state.index.insert(task_id, key);
        } // Lock released here

        self.notify.notify_one();
        true
    }

    /// Remove and return the most urgent task, if any.
    pub fn try_pop(&self) -> Option<TaskId> {
        let mut state = self.lock();
        let (_, task_id) = state.entries.pop_first()?;
        state.index.remove(&task_id);
        Some(task_id)
    }

    /// Wait up to `poll_interval` for a task.
    pub async fn pop(&self, poll_interval: Duration) -> Option<TaskId> {
        let deadline = Instant::now() + poll_interval;
        loop {
            // Register interest before checking, so a push in between is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task_id) = self.try_pop() {
                return Some(task_id);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Pull a task out of the queue (cancellation). Returns whether it was queued.
    pub fn remove(&self, task_id: &TaskId) -> bool {
        let mut state = self.lock();
        match state.index.remove(task_id) {
            Some(key) => {
                state.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().index.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pops_most_urgent_first() {
        let queue = PriorityQueue::new();
        let now = Utc::now();
        let low = TaskId::new();
        let critical = TaskId::new();
        let normal = TaskId::new();

        queue.push(low, Priority::LOW, now);
        queue.push(critical, Priority::CRITICAL, now);
        queue.push(normal, Priority::NORMAL, now);

        assert_eq!(queue.try_pop(), Some(critical));
        assert_eq!(queue.try_pop(), Some(normal));
        assert_eq!(queue.try_pop(), Some(low));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn equal_priority_is_fifo_by_creation_time() {
        let queue = PriorityQueue::new();
        let now = Utc::now();
        let older = TaskId::new();
        let newer = TaskId::new();

        // pushed out of order on purpose
        queue.push(newer, Priority::NORMAL, now + chrono::Duration::milliseconds(5));
        queue.push(older, Priority::NORMAL, now);

        assert_eq!(queue.try_pop(), Some(older));
        assert_eq!(queue.try_pop(), Some(newer));
    }

    #[test]
    fn identical_keys_fall_back_to_insertion_order() {
        let queue = PriorityQueue::new();
        let now = Utc::now();
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        for id in &ids {
            queue.push(*id, Priority::HIGH, now);
        }
        let popped: Vec<TaskId> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn duplicate_push_is_rejected() {
        let queue = PriorityQueue::new();
        let id = TaskId::new();
        assert!(queue.push(id, Priority::LOW, Utc::now()));
        assert!(!queue.push(id, Priority::CRITICAL, Utc::now()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_takes_task_out_of_eligibility() {
        let queue = PriorityQueue::new();
        let id = TaskId::new();
        queue.push(id, Priority::NORMAL, Utc::now());

        assert!(queue.remove(&id));
        assert!(!queue.remove(&id));
        assert!(!queue.contains(&id));
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_gives_up_after_poll_interval() {
        let queue = PriorityQueue::new();
        let start = Instant::now();
        let popped = queue.pop(Duration::from_millis(50)).await;
        assert_eq!(popped, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_pop() {
        let queue = Arc::new(PriorityQueue::new());
        let id = TaskId::new();

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(id, Priority::NORMAL, Utc::now());

        assert_eq!(waiter.await.unwrap(), Some(id));
    }
}
