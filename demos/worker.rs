//! Example: a job worker that may crash mid-job
//!
//! Run with: `cargo run --example worker`
//!
//! Start several copies at once against the same Redis server. One of them
//! claims the job; the others take over whenever the current owner "crashes"
//! (which this demo does on purpose most of the time).
//!
//! Environment:
//! - `REDIS_URL` (default `redis://localhost:6379`)
//! - `LOCK_VERBOSITY` (`verbose` or `normal`)
//! - `RUST_LOG` for log filtering

use std::time::Duration;

use locking_worker::*;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SUCCESS_CHANCE: f64 = 0.15;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let verbosity = match std::env::var("LOCK_VERBOSITY") {
        Ok(value) => value.parse()?,
        Err(_) => StatusVerbosity::Normal,
    };

    let provider = RedisLockProvider::builder()
        .url(&redis_url)
        .verbosity(verbosity)
        .poll_interval(Duration::from_secs(2))
        .max_attempts(5)
        .build()
        .await?;
    info!(%redis_url, "connected");

    let (tx, mut rx) = event_channel();
    let worker = provider.create_worker("demo-job", tx)?;
    worker.acquire();

    while let Some(event) = rx.recv().await {
        match event {
            LockEvent::Acquired { last_attempt } => {
                info!(last_attempt, id = worker.id(), "got the job");
                tokio::time::sleep(Duration::from_millis(500)).await;

                if rand::thread_rng().gen_bool(SUCCESS_CHANCE) {
                    worker.done(last_attempt).await?;
                    info!("job finished");
                } else {
                    warn!("crashing without finishing the job");
                }
                break;
            }
            LockEvent::Locked => info!("someone else holds the job"),
            LockEvent::Status { message, .. } => info!("{message}"),
            LockEvent::MaxAttemptsExceeded => {
                warn!("job failed too many times, giving up");
                break;
            }
            LockEvent::Error(err) => {
                warn!(error = %err, "lock error");
                break;
            }
        }
    }

    Ok(())
}
