//! Dispatcher - queue から取り出して worker に渡すループ
//!
//! # フロー
//! 1. 空き slot を確保（なければ待つ）
//! 2. queue から最優先の task を取り出す（poll_interval で打ち切り）
//! 3. slot ごと engine に渡して実行

use std::sync::Arc;

use tracing::{debug, info};

use super::engine::Engine;

pub(crate) async fn run(engine: Arc<Engine>) {
    info!(workers = engine.pool.size(), "dispatcher started");
    let poll_interval = engine.config.poll_interval;

    loop {
        // slot を先に取る: 取り出した task が slot 待ちで宙に浮かないように
        let permit = tokio::select! {
            _ = engine.stop.cancelled() => break,
            permit = engine.pool.acquire() => permit,
        };
        let Some(permit) = permit else {
            break;
        };

        let task_id = loop {
            tokio::select! {
                _ = engine.stop.cancelled() => break None,
                popped = engine.queue.pop(poll_interval) => {
                    if popped.is_some() {
                        break popped;
                    }
                }
            }
        };
        let Some(task_id) = task_id else {
            break;
        };

        debug!(task_id = %task_id, "dispatching");
        let attempt = Arc::clone(&engine).run_attempt(task_id);
        engine.pool.spawn_attempt(permit, attempt);
    }

    info!("dispatcher stopped");
}
