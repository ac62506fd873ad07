//! quill: scripted demo sessions for the task queue and the cache chain.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use quill_core::{
    CacheConfig, Config, EnqueueOptions, EnqueueRequest, Handler, InMemoryBackend, Job,
    MultiLevelCache, QueueConfig, QueueEvent, SetOptions, TaskError, TaskQueue,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Demo sessions for the quill task queue and cache", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run prioritized, flaky, and unroutable tasks through a queue
    DemoQueue {
        /// How many times the flaky task fails before it succeeds
        #[arg(long, default_value_t = 2)]
        failures: u32,
    },

    /// Read through a multi-level cache and print per-level stats
    DemoCache {
        /// Passes over the key set
        #[arg(long, default_value_t = 3)]
        rounds: usize,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Greet {
    name: String,
}

impl Job for Greet {
    const TYPE: &'static str = "demo.greet.v1";
    type Output = String;
}

struct GreetHandler;

#[async_trait]
impl Handler<Greet> for GreetHandler {
    async fn handle(&self, job: Greet) -> Result<String, TaskError> {
        Ok(format!("Hello, {}!", job.name))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::DemoQueue { failures } => demo_queue(config.queue, failures).await,
        Commands::DemoCache { rounds } => demo_cache(&config.cache_levels, rounds).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn demo_queue(config: QueueConfig, failures: u32) -> Result<()> {
    let backend = InMemoryBackend::new();
    backend.register_typed::<Greet, _>(GreetHandler)?;

    let remaining = Arc::new(AtomicU32::new(failures));
    backend.register_fn("demo.flaky", move |payload: Value| {
        let remaining = Arc::clone(&remaining);
        async move {
            let left = remaining.load(Ordering::SeqCst);
            if left > 0 {
                remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(TaskError::transient(format!(
                    "intentional failure (left={left})"
                )));
            }
            Ok(json!({ "echo": payload }))
        }
    })?;

    let queue = TaskQueue::new(backend, config);
    let mut events = queue.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.task_state() {
                Some((task_id, state)) => println!("event: {:<15} {task_id} {state:?}", event.name()),
                None => println!("event: {}", event.name()),
            }
            if matches!(event, QueueEvent::Stopped { .. }) {
                break;
            }
        }
    });

    // hold dispatch so priority decides the order, not arrival
    queue.pause();
    let mut ids = Vec::new();
    ids.push(
        queue
            .enqueue_typed(&Greet { name: "low".into() }, EnqueueOptions::new().priority(1))
            .await?,
    );
    ids.push(
        queue
            .enqueue_typed(&Greet { name: "high".into() }, EnqueueOptions::new().priority(10))
            .await?,
    );
    ids.extend(
        queue
            .enqueue_batch([
                EnqueueRequest::new("demo.flaky", json!({ "attempt": "until it works" }))
                    .with_options(EnqueueOptions::new().max_attempts(failures + 1)),
                EnqueueRequest::new("demo.unregistered", json!({})),
            ])
            .await?,
    );
    info!(tasks = ids.len(), "demo tasks enqueued");
    queue.resume();

    let wait = Some(Duration::from_secs(120));
    for id in ids {
        match queue.get_result(id, wait).await {
            Some(result) => println!("result: {}", serde_json::to_string(&result)?),
            None => println!("result: {id} did not finish in time"),
        }
    }

    println!("stats: {}", serde_json::to_string(&queue.stats().await?)?);
    queue.stop().await?;
    printer.await?;
    Ok(())
}

async fn demo_cache(levels: &[CacheConfig], rounds: usize) -> Result<()> {
    let cache: MultiLevelCache<String, Value> = MultiLevelCache::from_configs(levels)?;
    cache.start_sweepers();

    let loads = Arc::new(AtomicUsize::new(0));
    let keys = ["user:1", "user:2", "user:3"];

    for round in 0..rounds {
        for key in keys {
            let loads = Arc::clone(&loads);
            let value = cache
                .get_or_set(
                    key.to_string(),
                    || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        // stand-in for a slow lookup
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        json!({ "id": key, "round": round })
                    },
                    SetOptions::default(),
                )
                .await;
            println!("round {round}: {key} = {value}");
        }
        // drop the fast level so the next round shows promotion from below
        if round == 0 {
            cache.levels()[0].clear();
        }
    }

    println!("factory runs: {}", loads.load(Ordering::SeqCst));
    for (depth, stats) in cache.stats().iter().enumerate() {
        println!("level {depth}: {}", serde_json::to_string(stats)?);
    }
    cache.stop();
    Ok(())
}
