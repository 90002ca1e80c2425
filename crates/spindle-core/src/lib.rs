//! spindle-core
//!
//! In-process background task scheduler: priority queue, bounded worker
//! pool, retry with exponential backoff, per-task timeouts, cooperative
//! cancellation and retention-based cleanup of finished tasks.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, priority, status, task, snapshot, events）
//! - **queue**: 優先度キューと retry backoff
//! - **runtime**: TaskExecutor trait, TaskContext, ExecutorRegistry
//! - **ports**: 抽象化レイヤー（Clock, EventSink）
//! - **app**: builder, manager, dispatcher, cleanup loop
//! - **config** / **error** / **observability**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod runtime;

pub use app::{ManagerBuilder, TaskManager};
pub use config::SchedulerConfig;
pub use domain::{Priority, Task, TaskEvent, TaskId, TaskSnapshot, TaskStatus, TaskType};
pub use error::{ExecutorError, SchedulerError};
pub use observability::{SchedulerStats, init_tracing};
pub use runtime::{ExecutorRegistry, FnExecutor, SimulatedExecutor, TaskContext, TaskExecutor};
