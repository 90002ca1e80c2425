use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::app::registry::TaskRegistry;
use crate::domain::{Task, TaskId, TaskType};
use crate::error::{ExecutorError, SchedulerError};

/// Performs the actual work of one task type.
///
/// Executors are supplied by the integration layer (one per tool/category)
/// and never see scheduler internals: they get a `TaskContext` and return a
/// result value or an error. Retry decisions are not theirs to make.
///
/// Cancellation is cooperative. Executors that block on external calls
/// (process execution, network I/O) should watch `ctx.cancelled()` or bind
/// the token to the external call's own cancellation mechanism.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> Result<Value, ExecutorError>;
}

/// What an executor gets to see of its task, plus the side channels it may
/// write to (progress, output log).
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    name: String,
    task_type: TaskType,
    metadata: Arc<Map<String, Value>>,
    attempt: u32,
    token: CancellationToken,
    registry: Option<Arc<TaskRegistry>>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        name: String,
        task_type: TaskType,
        metadata: Arc<Map<String, Value>>,
        attempt: u32,
        token: CancellationToken,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            task_id,
            name,
            task_type,
            metadata,
            attempt,
            token,
            registry: Some(registry),
        }
    }

    /// A context that is not attached to any scheduler. Progress and output
    /// are dropped. Handy for exercising an executor on its own.
    pub fn detached(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            name: task.name().to_string(),
            task_type: task.task_type().clone(),
            metadata: Arc::new(task.metadata().clone()),
            attempt: 1,
            token: CancellationToken::new(),
            registry: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// 1-based attempt number (`retry_count + 1`).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn report_progress(&self, percent: u8) {
        if let Some(registry) = &self.registry {
            registry.record_progress(&self.task_id, percent);
        }
    }

    pub fn append_output(&self, line: impl Into<String>) {
        if let Some(registry) = &self.registry {
            registry.append_output(&self.task_id, line.into());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep that wakes early with `ExecutorError::Cancelled`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ExecutorError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(ExecutorError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Adapts a closure into a `TaskExecutor`. Used for ad-hoc tasks and for
/// `register_fn`.
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> Result<Value, ExecutorError> {
        (self.f)(ctx).await
    }
}

/// No-op stand-in for task types whose executor never got registered.
/// Walks progress up in a few steps and succeeds.
pub struct SimulatedExecutor {
    steps: u8,
    step_delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(steps: u8, step_delay: Duration) -> Self {
        Self {
            steps: steps.max(1),
            step_delay,
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: TaskContext) -> Result<Value, ExecutorError> {
        for step in 1..=self.steps {
            ctx.sleep(self.step_delay).await?;
            let percent = (u32::from(step) * 100 / u32::from(self.steps)) as u8;
            ctx.report_progress(percent);
        }
        ctx.append_output(format!("simulated {}", ctx.task_type()));
        Ok(serde_json::json!({
            "simulated": true,
            "task_type": ctx.task_type().as_str(),
        }))
    }
}

/// Registry of executors (task_type -> executor).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind `Arc`).
/// This avoids locks on the dispatch path.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
    fallback: Option<Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<(), SchedulerError> {
        let task_type = task_type.into();
        if self.executors.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateExecutor(task_type));
        }
        self.executors.insert(task_type, executor);
        Ok(())
    }

    pub fn register_fn<F, Fut>(
        &mut self,
        task_type: impl Into<TaskType>,
        f: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnExecutor::new(f)))
    }

    /// Executor of last resort for types with neither a registration nor an
    /// ad-hoc function.
    pub fn set_fallback(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.fallback = Some(executor);
    }

    /// Registered executor, then the task's own function, then the fallback.
    pub fn resolve(
        &self,
        task_type: &TaskType,
        function: Option<&Arc<dyn TaskExecutor>>,
    ) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
        self.executors
            .get(task_type)
            .or(function)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownTaskType(task_type.clone()))
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct OkExecutor;

    #[async_trait]
    impl TaskExecutor for OkExecutor {
        async fn execute(&self, _ctx: TaskContext) -> Result<Value, ExecutorError> {
            Ok(json!("registered"))
        }
    }

    fn adhoc() -> Arc<dyn TaskExecutor> {
        Arc::new(FnExecutor::new(|_ctx: TaskContext| async {
            Ok::<_, ExecutorError>(json!("adhoc"))
        }))
    }

    #[tokio::test]
    async fn registered_executor_wins_over_function() {
        let mut reg = ExecutorRegistry::new();
        reg.register("ok", Arc::new(OkExecutor)).unwrap();

        let task = Task::new("t", "ok");
        let function = adhoc();
        let executor = reg.resolve(task.task_type(), Some(&function)).unwrap();
        let out = executor.execute(TaskContext::detached(&task)).await.unwrap();
        assert_eq!(out, json!("registered"));
    }

    #[tokio::test]
    async fn function_is_used_when_type_is_unregistered() {
        let reg = ExecutorRegistry::new();
        let task = Task::new("t", "adhoc");
        let function = adhoc();
        let executor = reg.resolve(task.task_type(), Some(&function)).unwrap();
        let out = executor.execute(TaskContext::detached(&task)).await.unwrap();
        assert_eq!(out, json!("adhoc"));
    }

    #[test]
    fn unknown_type_without_fallback_is_an_error() {
        let reg = ExecutorRegistry::new();
        let err = reg.resolve(&TaskType::new("missing"), None).err().unwrap();
        assert!(matches!(err, ExecutorError::UnknownTaskType(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn fallback_catches_unknown_types() {
        let mut reg = ExecutorRegistry::new();
        reg.set_fallback(Arc::new(SimulatedExecutor::default()));
        assert!(reg.resolve(&TaskType::new("missing"), None).is_ok());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = ExecutorRegistry::new();
        reg.register("ok", Arc::new(OkExecutor)).unwrap();
        let err = reg.register("ok", Arc::new(OkExecutor)).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateExecutor(t) if t.as_str() == "ok"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut reg = ExecutorRegistry::new();
        reg.register("b", Arc::new(OkExecutor)).unwrap();
        reg.register_fn("a", |_ctx| async { Ok::<_, ExecutorError>(Value::Null) })
            .unwrap();
        assert_eq!(reg.registered_types(), vec![TaskType::new("a"), TaskType::new("b")]);
    }

    #[tokio::test]
    async fn metadata_reaches_the_function_as_arguments() {
        let task = Task::new("sum", "math.sum")
            .with_metadata("a", 2)
            .with_metadata("b", 3)
            .with_fn(|ctx: TaskContext| async move {
                let a = ctx.metadata()["a"].as_i64().unwrap_or(0);
                let b = ctx.metadata()["b"].as_i64().unwrap_or(0);
                Ok::<_, ExecutorError>(json!(a + b))
            });
        let function = task.function.clone().unwrap();
        let out = function.execute(TaskContext::detached(&task)).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn context_sleep_stops_on_cancellation() {
        let task = Task::new("t", "slow");
        let ctx = TaskContext::detached(&task);
        ctx.cancellation_token().cancel();
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn simulated_executor_succeeds() {
        let task = Task::new("t", "unregistered");
        let out = SimulatedExecutor::new(2, Duration::from_millis(1))
            .execute(TaskContext::detached(&task))
            .await
            .unwrap();
        assert_eq!(out["simulated"], true);
    }
}
