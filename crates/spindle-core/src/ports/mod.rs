//! Ports - 抽象化レイヤー
//!
//! scheduler が外部に依存する箇所（時刻、イベント通知）を trait として切り出す。
//! テストでは ManualClock / BroadcastEventSink に差し替える。

pub mod clock;
pub mod event_sink;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::{BroadcastEventSink, EventSink, NoopEventSink};
