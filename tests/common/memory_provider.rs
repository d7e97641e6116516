//! In-memory provider for exercising the provider abstraction.

use std::sync::Arc;
use std::time::Duration;

use locking_worker_core::error::LockResult;
use locking_worker_core::events::LockEventSink;
use locking_worker_core::memory::MemoryLockStore;
use locking_worker_core::options::{LockOptions, StatusVerbosity};
use locking_worker_core::traits::LockingWorkerProvider;
use locking_worker_core::worker::LockingWorker;

/// Provider handing out workers over one shared memory store.
pub struct MemoryLockProvider {
    store: Arc<MemoryLockStore>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl MemoryLockProvider {
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            store: Arc::new(MemoryLockStore::new()),
            poll_interval,
            max_attempts,
        }
    }

    pub fn store(&self) -> &MemoryLockStore {
        &self.store
    }
}

impl LockingWorkerProvider for MemoryLockProvider {
    type Store = MemoryLockStore;

    fn create_worker<K>(&self, lock_key: &str, sink: K) -> LockResult<LockingWorker<Self::Store>>
    where
        K: LockEventSink + 'static,
    {
        let options = LockOptions::builder(lock_key)
            .verbosity(StatusVerbosity::Verbose)
            .poll_interval(self.poll_interval)
            .max_attempts(self.max_attempts)
            .build()?;
        Ok(LockingWorker::new(self.store.clone(), options, sink))
    }
}
