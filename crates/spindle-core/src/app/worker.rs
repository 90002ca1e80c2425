//! WorkerPool - 同時実行数の制御
//!
//! # 設計
//! - slot は Semaphore の permit。permit を持つ間だけ 1 つの attempt を実行できる
//! - 実行中の attempt と retry の backoff は TaskTracker で追跡し、shutdown で待ち合わせる
//! - busy() は実行中の attempt 数。dispatcher が pop 待ちで握っている permit は数えない

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

pub(crate) struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
    tracker: TaskTracker,
}

/// Counts one running attempt; released even if the attempt is aborted.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Attempts currently running.
    pub fn busy(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a free slot. `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().acquire_owned().await.ok()
    }

    /// Run one attempt on the slot `permit`. The slot is freed only after
    /// `attempt` has completed, outcome handling included.
    pub fn spawn_attempt<F>(&self, permit: OwnedSemaphorePermit, attempt: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let in_flight = InFlight::enter(&self.in_flight);
        self.tracker.spawn(async move {
            attempt.await;
            drop(in_flight);
            drop(permit);
        });
    }

    /// Track background work that does not occupy a slot (retry backoff).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Stop handing out slots and wait for tracked work until `deadline`.
    /// Returns whether everything finished in time.
    pub async fn shutdown(&self, deadline: Instant) -> bool {
        self.slots.close();
        self.tracker.close();
        tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok()
    }
}
