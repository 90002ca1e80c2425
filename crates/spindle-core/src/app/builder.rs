//! ManagerBuilder - TaskManager の構築とワイヤリング
//!
//! # 設計
//! - executor の登録は build 前にだけ行う（実行中は ExecutorRegistry を不変に共有）
//! - 起動時検証（Fail-fast）: expect_task_types() の集合がすべて登録済みか
//! - build() で dispatcher と cleanup loop を起動する

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::engine::Engine;
use super::manager::TaskManager;
use super::registry::TaskRegistry;
use super::worker::WorkerPool;
use super::{dispatcher, gc_loop};
use crate::config::SchedulerConfig;
use crate::domain::TaskType;
use crate::error::{ExecutorError, SchedulerError};
use crate::ports::{BroadcastEventSink, Clock, EventSink, NoopEventSink, SystemClock};
use crate::queue::PriorityQueue;
use crate::runtime::{ExecutorRegistry, SimulatedExecutor, TaskContext, TaskExecutor};

/// ManagerBuilder は TaskManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = TaskManager::builder()
///     .config(config)
///     .register("nmap.scan", Arc::new(NmapExecutor::new()))?
///     .expect_task_types(&["nmap.scan"])
///     .build()?;
/// ```
pub struct ManagerBuilder {
    config: SchedulerConfig,
    executors: ExecutorRegistry,
    expected_task_types: Option<Vec<String>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            executors: ExecutorRegistry::new(),
            expected_task_types: None,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Executor を登録。同じ task_type の二重登録はエラー
    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SchedulerError> {
        self.executors.register(task_type, executor)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(
        mut self,
        task_type: impl Into<TaskType>,
        f: F,
    ) -> Result<Self, SchedulerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
    {
        self.executors.register_fn(task_type, f)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定（build 時に検証）
    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_task_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shorthand for a `BroadcastEventSink`, so `TaskManager::subscribe`
    /// hands out receivers.
    pub fn with_broadcast_events(self, capacity: usize) -> Self {
        self.event_sink(Arc::new(BroadcastEventSink::new(capacity)))
    }

    /// TaskManager を構築し、バックグラウンドループを起動
    ///
    /// # 検証
    /// - config.validate()
    /// - expect_task_types() の task_type がすべて登録されているか
    /// - 呼び出し元が tokio runtime 上にいるか
    pub fn build(mut self) -> Result<TaskManager, SchedulerError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_task_types {
            let registered = self.executors.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.iter().any(|r| r.as_str() == t.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(SchedulerError::MissingTaskTypes(missing));
            }
        }

        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        if self.config.simulate_unregistered {
            self.executors
                .set_fallback(Arc::new(SimulatedExecutor::default()));
        }

        let workers = self.config.effective_workers();
        let registry = Arc::new(TaskRegistry::new(self.clock, Arc::clone(&self.events)));
        let engine = Arc::new(Engine {
            registry,
            queue: PriorityQueue::new(),
            executors: self.executors,
            pool: WorkerPool::new(workers),
            retry: self.config.retry_policy(),
            config: self.config,
            stop: CancellationToken::new(),
        });

        let loops = vec![
            handle.spawn(dispatcher::run(Arc::clone(&engine))),
            handle.spawn(gc_loop::run(Arc::clone(&engine))),
        ];

        info!(
            workers,
            executors = engine.executors.len(),
            "task manager started"
        );

        Ok(TaskManager {
            engine,
            events: self.events,
            loops: Mutex::new(loops),
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_fn(_ctx: TaskContext) -> impl Future<Output = Result<Value, ExecutorError>> {
        async { Ok(Value::Null) }
    }

    #[tokio::test]
    async fn build_succeeds_when_expected_types_are_registered() {
        let manager = ManagerBuilder::new()
            .register_fn("a", ok_fn)
            .unwrap()
            .expect_task_types(&["a"])
            .build();
        assert!(manager.is_ok());
    }

    #[tokio::test]
    async fn build_reports_missing_task_types() {
        let result = ManagerBuilder::new()
            .register_fn("a", ok_fn)
            .unwrap()
            .expect_task_types(&["a", "b"])
            .build();
        assert!(matches!(
            result,
            Err(SchedulerError::MissingTaskTypes(missing)) if missing == vec!["b".to_string()]
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_fails_fast() {
        let result = ManagerBuilder::new()
            .register_fn("a", ok_fn)
            .unwrap()
            .register_fn("a", ok_fn);
        assert!(matches!(result, Err(SchedulerError::DuplicateExecutor(_))));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = SchedulerConfig {
            max_workers: 0,
            ..Default::default()
        };
        let result = ManagerBuilder::new().config(config).build();
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn build_outside_a_runtime_fails() {
        let result = ManagerBuilder::new().build();
        assert!(matches!(result, Err(SchedulerError::NoRuntime)));
    }
}
