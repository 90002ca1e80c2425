//! Engine - 1 回の attempt の実行と、その結果の反映
//!
//! # フロー
//! 1. TaskRegistry::claim() で QUEUED -> RUNNING
//! 2. ExecutorRegistry::resolve() で executor を決定
//! 3. 別 task で executor を実行（timeout / panic を隔離）
//! 4. TaskRegistry::finish() で結果を反映し、retry なら backoff 後に再投入

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{AttemptOutcome, Claim, Disposition, TaskRegistry};
use super::worker::WorkerPool;
use crate::config::SchedulerConfig;
use crate::domain::TaskId;
use crate::queue::{PriorityQueue, RetryPolicy};
use crate::runtime::{ExecutorRegistry, TaskContext};

/// Shared state of one scheduler instance. Everything the loops and the
/// facade touch hangs off this.
pub(crate) struct Engine {
    pub registry: Arc<TaskRegistry>,
    pub queue: PriorityQueue,
    pub executors: ExecutorRegistry,
    pub pool: WorkerPool,
    pub retry: RetryPolicy,
    pub config: SchedulerConfig,
    /// Fired once on shutdown; stops the loops and pending backoffs.
    pub stop: CancellationToken,
}

impl Engine {
    /// Run one attempt of `task_id`. The caller holds the worker slot until
    /// this returns, outcome handling included.
    pub async fn run_attempt(self: Arc<Self>, task_id: TaskId) {
        let Some(claim) = self.registry.claim(&task_id) else {
            // pop と claim の間に cancel された
            debug!(task_id = %task_id, "task no longer queued, skipping");
            return;
        };

        info!(
            task_id = %task_id,
            task_type = %claim.task_type,
            attempt = claim.attempt,
            "task started"
        );
        let outcome = self.execute(task_id, claim).await;
        self.settle(task_id, outcome);
    }

    async fn execute(&self, task_id: TaskId, claim: Claim) -> AttemptOutcome {
        let executor = match self
            .executors
            .resolve(&claim.task_type, claim.function.as_ref())
        {
            Ok(executor) => executor,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "no executor");
                return AttemptOutcome::Failed(err.to_string());
            }
        };

        let timeout = claim.timeout;
        let token = claim.token.clone();
        let ctx = TaskContext::new(
            task_id,
            claim.name,
            claim.task_type,
            claim.metadata,
            claim.attempt,
            claim.token,
            Arc::clone(&self.registry),
        );

        let mut handle = tokio::spawn(async move { executor.execute(ctx).await });
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    handle.abort();
                    warn!(task_id = %task_id, timeout = ?limit, "task timed out");
                    return AttemptOutcome::TimedOut(limit);
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(value)) => AttemptOutcome::Succeeded(value),
            // cancel 済みなら finish 側で破棄される。それ以外は通常の失敗
            Ok(Err(err)) => {
                warn!(task_id = %task_id, error = %err, "task attempt failed");
                AttemptOutcome::Failed(err.to_string())
            }
            Err(err) => {
                let message = join_error_message(err);
                warn!(task_id = %task_id, error = %message, "executor aborted");
                AttemptOutcome::Failed(message)
            }
        }
    }

    fn settle(self: &Arc<Self>, task_id: TaskId, outcome: AttemptOutcome) {
        match self.registry.finish(&task_id, outcome) {
            Disposition::Settled(status) => {
                info!(task_id = %task_id, status = %status, "task finished");
            }
            Disposition::Retry { retry_count } => {
                let delay = self.retry.next_delay(retry_count);
                info!(
                    task_id = %task_id,
                    retry_count,
                    delay = ?delay,
                    "task scheduled for retry"
                );
                self.schedule_retry(task_id, delay);
            }
            Disposition::Discarded => {
                debug!(task_id = %task_id, "outcome discarded, task was cancelled");
            }
        }
    }

    /// Sleep out the backoff off the worker slot, then re-queue.
    fn schedule_retry(self: &Arc<Self>, task_id: TaskId, delay: Duration) {
        let engine = Arc::clone(self);
        self.pool.spawn(async move {
            tokio::select! {
                _ = engine.stop.cancelled() => {
                    debug!(task_id = %task_id, "retry backoff interrupted by shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    if engine.registry.requeue(&task_id, &engine.queue) {
                        debug!(task_id = %task_id, "task re-queued");
                    }
                }
            }
        });
    }

    /// Evict completed tasks older than the retention window.
    pub fn cleanup(&self) -> usize {
        let now = self.registry.now();
        let Some(cutoff) = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            // retention が表現できないほど長い = 何も消さない
            return 0;
        };
        self.registry.purge_completed_before(cutoff)
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "executor was aborted".to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("executor panicked: {detail}")
}
