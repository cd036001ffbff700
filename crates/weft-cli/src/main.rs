use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};

use weft_core::{
    Chunk, HandlerError, InMemoryStore, LogFormat, Queue, QueueConfig, QueueEvent, SharedStore,
    Task, TaskId, Typed, TypedJob, WorkerOptions, init_logging,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Pretty,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => LogFormat::Json,
            Format::Pretty => LogFormat::Pretty,
        }
    }
}

/// Runs a sum-of-squares job across several coordinators sharing one
/// in-memory store.
#[derive(Debug, Parser)]
#[command(name = "weft", version)]
struct Args {
    /// Number of queue processes sharing the store.
    #[arg(long, default_value_t = 3, env = "WEFT_COORDINATORS")]
    coordinators: usize,

    /// Number of tasks to push.
    #[arg(long, default_value_t = 10)]
    tasks: usize,

    /// Numbers per task (one chunk each).
    #[arg(long, default_value_t = 5)]
    size: i64,

    /// Concurrent chunks per task on one coordinator.
    #[arg(long, default_value_t = 2)]
    chunks_per_instance: usize,

    #[arg(long, default_value_t = 100, env = "WEFT_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    #[arg(long, value_enum, default_value_t = Format::Pretty, env = "WEFT_LOG_FORMAT")]
    log_format: Format,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 30)]
    deadline_secs: u64,
}

struct SumOfSquares {
    done: mpsc::UnboundedSender<(TaskId, i64)>,
}

#[async_trait]
impl TypedJob for SumOfSquares {
    type Input = Vec<i64>;
    type Item = i64;
    type Output = i64;

    async fn map(&self, _task: &Task, input: Vec<i64>) -> Result<Vec<i64>, HandlerError> {
        Ok(input)
    }

    async fn process(&self, chunk: &Chunk, n: i64) -> Result<i64, HandlerError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        info!(chunk = %chunk.id(), n, "squared");
        Ok(n * n)
    }

    async fn reduce(&self, task: &Task, results: Vec<i64>) -> Result<(), HandlerError> {
        let total: i64 = results.iter().sum();
        let _ = self.done.send((task.id().clone(), total));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format.into());

    if args.coordinators == 0 {
        bail!("--coordinators must be at least 1");
    }

    let config = QueueConfig {
        poll_interval_ms: args.poll_interval_ms,
        ..QueueConfig::default()
    };
    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(Typed(SumOfSquares { done: done_tx }));

    let mut queues = Vec::with_capacity(args.coordinators);
    for _ in 0..args.coordinators {
        let queue = Queue::builder(Arc::clone(&store))
            .config(config.clone())
            .build()
            .context("building queue")?;
        queue
            .register_shared(
                WorkerOptions::new("squares").chunks_per_instance(args.chunks_per_instance),
                handler.clone(),
            )
            .context("registering worker")?;
        spawn_error_logger(&queue);
        queue.start();
        queues.push(queue);
    }

    let squares = queues[0]
        .worker("squares")
        .context("worker registered above")?;
    for i in 0..args.tasks as i64 {
        let numbers: Vec<i64> = (i..i + args.size).collect();
        squares.push(json!(numbers)).await?;
    }
    info!(tasks = args.tasks, coordinators = args.coordinators, "tasks pushed");

    let wait = async {
        let mut finished = 0;
        while finished < args.tasks {
            let Some((task, total)) = done_rx.recv().await else {
                break;
            };
            finished += 1;
            info!(%task, total, finished, "task reduced");
        }
        finished
    };

    let outcome = tokio::select! {
        finished = wait => Ok(finished),
        _ = tokio::signal::ctrl_c() => Err("interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(args.deadline_secs)) => Err("deadline reached"),
    };

    for queue in &queues {
        queue.shutdown().await;
    }

    match outcome {
        Ok(finished) => {
            info!(finished, "all tasks reduced");
            Ok(())
        }
        Err(reason) => {
            let counts = squares.counts().await?;
            bail!("{reason} with tasks outstanding: {counts:?}")
        }
    }
}

fn spawn_error_logger(queue: &Queue) {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Error(err)) => warn!(error = %err, "queue error"),
                Ok(QueueEvent::Idle) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "error log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
