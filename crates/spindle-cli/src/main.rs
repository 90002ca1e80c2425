use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use spindle_core::{
    ExecutorError, Priority, SchedulerConfig, Task, TaskContext, TaskExecutor, TaskManager,
    init_tracing,
};

#[derive(Debug, Deserialize)]
struct HelloArgs {
    name: String,
}

/// 指定回数だけ失敗してから挨拶する executor（retry の確認用）
struct HelloExecutor {
    remaining_failures: AtomicU32,
}

impl HelloExecutor {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskExecutor for HelloExecutor {
    async fn execute(&self, ctx: TaskContext) -> Result<Value, ExecutorError> {
        let args: HelloArgs = serde_json::from_value(Value::Object(ctx.metadata().clone()))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ExecutorError::failed(format!(
                "intentional failure (left={left})"
            )));
        }

        ctx.append_output(format!("Hello, {}!", args.name));
        Ok(json!({ "greeted": args.name, "attempt": ctx.attempt() }))
    }
}

#[tokio::main]
async fn main() {
    // (A) 設定とログ
    let config = match SchedulerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_tracing(&config.log_level);

    // (B) executor を登録して manager を起動
    let manager = TaskManager::builder()
        .config(config)
        .register("hello", Arc::new(HelloExecutor::new(2)))
        .and_then(|b| {
            b.register_fn("sleep", |ctx: TaskContext| async move {
                let ms = ctx.metadata().get("ms").and_then(Value::as_u64).unwrap_or(100);
                for step in 1..=4u8 {
                    ctx.sleep(Duration::from_millis(ms / 4)).await?;
                    ctx.report_progress(step * 25);
                }
                Ok::<_, ExecutorError>(json!({ "slept_ms": ms }))
            })
        })
        .and_then(|b| b.expect_task_types(&["hello", "sleep"]).build());
    let manager = match manager {
        Ok(manager) => manager,
        Err(err) => {
            error!(error = %err, "failed to start task manager");
            std::process::exit(1);
        }
    };

    // (C) タスク投入（優先度つき）
    let mut ids = Vec::new();
    let submissions = [
        Task::new("greet", "hello")
            .with_metadata("name", "spindle")
            .with_max_retries(3),
        Task::new("nap", "sleep")
            .with_priority(Priority::LOW)
            .with_metadata("ms", 400),
        Task::new("short nap", "sleep")
            .with_priority(Priority::CRITICAL)
            .with_metadata("ms", 100),
        Task::new("too long", "sleep")
            .with_metadata("ms", 5_000)
            .with_timeout(Duration::from_millis(300)),
    ];
    for task in submissions {
        match manager.submit(task) {
            Ok(id) => ids.push(id),
            Err(err) => error!(error = %err, "submit failed"),
        }
    }

    // (D) 完了を待って結果を表示
    for id in &ids {
        if let Some(snap) = manager.wait_for(id, Duration::from_secs(10)).await {
            info!(
                task_id = %snap.id,
                name = %snap.name,
                status = %snap.status,
                retries = snap.retry_count,
                error = ?snap.error,
                "final status"
            );
            match serde_json::to_string(&snap) {
                Ok(line) => println!("{line}"),
                Err(err) => error!(error = %err, "snapshot encode failed"),
            }
        }
    }

    match serde_json::to_string_pretty(&manager.get_statistics()) {
        Ok(stats) => println!("{stats}"),
        Err(err) => error!(error = %err, "stats encode failed"),
    }

    // (E) graceful shutdown
    manager.shutdown_default().await;
}
