//! Job locking for worker pools sharing a Redis server.
//!
//! Several worker processes race for the right to run the same job. The
//! first to create the lock key runs it; the others poll the key and take
//! over when the owner stops making progress, up to a fixed number of
//! attempts.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use locking_worker::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = RedisLockProvider::new("redis://localhost:6379").await?;
//!
//!     let (tx, mut rx) = event_channel();
//!     let worker = provider.create_worker("nightly-report", tx)?;
//!     worker.acquire();
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             LockEvent::Acquired { last_attempt } => {
//!                 println!("running the job");
//!                 worker.done(last_attempt).await?;
//!                 break;
//!             }
//!             LockEvent::MaxAttemptsExceeded | LockEvent::Error(_) => break,
//!             other => println!("{other}"),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Protocol
//!
//! The lock key holds an attempt counter. A contender that finds the key
//! taken polls it every `poll_interval`; if the counter has not moved since
//! the previous poll the owner is presumed dead and the contender tries to
//! bump the counter inside an optimistic transaction. An owner that
//! finishes writes `DONE`, which the next poller deletes. Once the counter
//! reaches `max_attempts`, pollers give up and leave a TTL on the key.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `locking-worker-core`: state machine, store traits, in-memory store
//! - `locking-worker-redis`: Redis store and provider

pub use locking_worker_core::*;

pub use locking_worker_redis::*;
