//! GCLoop - 完了済み task の保持期限切れを削除
//!
//! cleanup_interval ごとに completed_at < now - retention の task を落とす。

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::engine::Engine;

pub(crate) async fn run(engine: Arc<Engine>) {
    let mut ticker = tokio::time::interval(engine.config.cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 最初の tick は即時に来るので捨てる
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = engine.stop.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = engine.cleanup();
                if evicted > 0 {
                    info!(evicted, "evicted expired tasks");
                } else {
                    debug!("cleanup found nothing to evict");
                }
            }
        }
    }

    debug!("cleanup loop stopped");
}
