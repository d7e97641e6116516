//! Example: many contenders in one process
//!
//! Run with: `cargo run --example cluster`
//!
//! Spawns one contender per CPU, each with its own worker on the same key,
//! and prints how the job travels between them. Requires a Redis server;
//! set REDIS_URL to override the default.

use std::time::Duration;

use locking_worker::*;
use rand::Rng;
use tracing_subscriber::EnvFilter;

const KEY: &str = "demo-cluster-job";

async fn contender(provider: &RedisLockProvider, n: usize) -> LockResult<()> {
    let (tx, mut rx) = event_channel();
    let worker = provider.create_worker(KEY, tx)?;
    worker.acquire();

    while let Some(event) = rx.recv().await {
        match event {
            LockEvent::Acquired { last_attempt } => {
                println!("[{n}] acquired (last attempt: {last_attempt})");
                let finished = rand::thread_rng().gen_bool(0.15);
                if finished || last_attempt {
                    worker.done(last_attempt).await?;
                    println!("[{n}] finished the job");
                } else {
                    println!("[{n}] stalled");
                }
                return Ok(());
            }
            LockEvent::Status { .. } | LockEvent::Locked => {}
            other => {
                println!("[{n}] {other}");
                return Ok(());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let provider = std::sync::Arc::new(
        RedisLockProvider::builder()
            .url(redis_url)
            .poll_interval(Duration::from_millis(500))
            .max_attempts(4)
            .build()
            .await?,
    );
    provider.store().delete(KEY).await?;

    let contenders = std::thread::available_parallelism().map_or(4, |n| n.get());
    println!("spawning {contenders} contenders");

    let mut tasks = Vec::with_capacity(contenders);
    for n in 0..contenders {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move { contender(&provider, n).await }));
    }
    for task in tasks {
        if let Err(err) = task.await? {
            eprintln!("contender failed: {err}");
        }
    }

    Ok(())
}
