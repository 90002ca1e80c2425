//! EventSink port - ステータス遷移イベントの通知
//!
//! - **NoopEventSink**: 何もしない（デフォルト）
//! - **BroadcastEventSink**: tokio broadcast で websocket などに流す
//!
//! `emit` は registry のロック内で呼ばれるので、ブロックしてはいけない。

use tokio::sync::broadcast;

use crate::domain::TaskEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);

    /// Receiver for sinks that fan events out in-process.
    fn subscribe(&self) -> Option<broadcast::Receiver<TaskEvent>> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &TaskEvent) {}
}

/// Slow subscribers lag (and skip) rather than stall the scheduler.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &TaskEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<TaskEvent>> {
        Some(self.tx.subscribe())
    }
}
