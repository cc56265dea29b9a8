use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde_json::{Value, json};
use tracing::info;

use taskodo_core::{
    FetchedResult, FnTask, FunctionRegistry, Scheduler, SchedulerConfig, TaskError, TaskFn,
    TaskId, TaskRequest,
};

/// taskodo デモ: サンプルタスクを投入して全部終わるまで見守る
#[derive(Debug, Parser)]
#[command(name = "taskodo", version, about = "In-process task scheduler demo")]
struct Cli {
    /// Number of workers (overrides the config file)
    #[arg(long, env = "TASKODO_WORKERS")]
    workers: Option<usize>,

    /// Delay before re-checking blocked tasks, in milliseconds
    #[arg(long, env = "TASKODO_RETRY_DELAY_MS")]
    retry_delay_ms: Option<u64>,

    /// Scheduler config (TOML)
    #[arg(long, env = "TASKODO_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds of real sleep per unit of sample work
    #[arg(long, default_value_t = 0.2)]
    time_scale: f64,

    /// Status poll interval, in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

impl Cli {
    fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => SchedulerConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        config.validate().context("invalid scheduler config")?;
        Ok(config)
    }
}

/// (units, message): "started" を出して眠り、"finished" を出す
fn foo(time_scale: f64) -> Arc<dyn TaskFn> {
    Arc::new(FnTask::new("foo", move |args: Vec<Value>| {
        let (Some(units), Some(message)) = (
            args.first().and_then(Value::as_f64),
            args.get(1).and_then(Value::as_str),
        ) else {
            return Err(TaskError::BadArguments(format!("expected (units, message), got {args:?}")));
        };
        println!("{message} started...");
        std::thread::sleep(Duration::from_secs_f64(units * time_scale));
        println!("{message} finished");
        Ok(json!(message))
    }))
}

/// foo が走っていない時だけ動く集計タスク
fn report() -> Arc<dyn TaskFn> {
    Arc::new(FnTask::new("report", |args: Vec<Value>| {
        let label = args.first().and_then(Value::as_str).unwrap_or("report");
        println!("{label}: no foo running");
        Ok(json!({ "label": label }))
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    ensure!(
        cli.time_scale.is_finite() && cli.time_scale >= 0.0,
        "--time-scale must be a non-negative number"
    );
    let config = cli.scheduler_config()?;

    // (A) 関数を登録
    let mut registry = FunctionRegistry::new();
    registry.register(foo(cli.time_scale))?;
    registry.register(report())?;

    // (B) scheduler と worker を起動
    let scheduler = Scheduler::new(config);
    let workers = scheduler.start().await;
    info!(workers = workers.len(), "scheduler started");

    // (C) サンプルを投入: sleep 3 本、依存 1 本、非互換 1 本
    let requests = vec![
        TaskRequest::named(&registry, "foo", vec![json!(10), json!("Task 1")])?.with_id("Task 1"),
        TaskRequest::named(&registry, "foo", vec![json!(11), json!("Task 3")])?.with_id("Task 3"),
        TaskRequest::named(&registry, "foo", vec![json!(4), json!("Task 2")])?.with_id("Task 2"),
        TaskRequest::named(&registry, "foo", vec![json!(2), json!("Task 4")])?
            .with_id("Task 4")
            .depends_on(["Task 2"]),
        TaskRequest::named(&registry, "report", vec![json!("Report")])?
            .with_id("Report")
            .incompatible_with(["foo"]),
    ];
    let mut ids: Vec<TaskId> = Vec::with_capacity(requests.len());
    for request in requests {
        let id = scheduler.submit(request).await?;
        info!(task_id = %id, "submitted");
        ids.push(id);
    }

    // (D) 全部 terminal になるまでポーリング
    let poll = Duration::from_millis(cli.poll_ms.max(1));
    loop {
        let mut done = true;
        for id in &ids {
            let status = scheduler.status(id).await;
            println!("{id} is {status}");
            done &= status.is_terminal();
        }
        if done {
            break;
        }
        tokio::time::sleep(poll).await;
    }

    // (E) 結果を取り出して片付ける
    for id in &ids {
        match scheduler.fetch_result(id, true).await {
            FetchedResult::Finished(value) => println!("{id}: finished -> {value}"),
            FetchedResult::Failed(message) => println!("{id}: failed -> {message}"),
            other => println!("{id}: {other:?}"),
        }
    }
    let stats = scheduler.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    scheduler.shutdown().await;
    Ok(())
}
