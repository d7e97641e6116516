//! Convenience prelude for locking worker types.

pub use crate::error::{LockError, LockResult};
pub use crate::events::{callback_sink, event_channel, CallbackSink, LockEvent, LockEventSink};
pub use crate::memory::MemoryLockStore;
pub use crate::options::{LockOptions, LockOptionsBuilder, StatusVerbosity};
pub use crate::state::LockState;
pub use crate::traits::{LockStore, LockingWorkerProvider, TxOutcome, WatchSession};
pub use crate::value::{LockValue, DONE_VALUE};
pub use crate::worker::LockingWorker;
