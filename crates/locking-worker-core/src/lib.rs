//! Core of the locking worker: a job lock coordinated through a shared
//! key-value store.
//!
//! Contenders race to create the lock key. The winner does the work; the
//! others poll the key and take over when the attempt counter stops moving
//! between polls, until the counter reaches the configured maximum.

pub mod error;
pub mod events;
pub mod memory;
pub mod options;
pub mod prelude;
pub mod state;
pub mod timer;
pub mod traits;
pub mod value;
pub mod worker;

pub use error::{LockError, LockResult};
pub use prelude::*;
