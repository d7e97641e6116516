//! Store adapter traits.

use std::future::Future;
use std::time::Duration;

use crate::error::LockResult;
use crate::events::LockEventSink;
use crate::worker::LockingWorker;

// ============================================================================
// Transaction Outcome
// ============================================================================

/// Result of an optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome<T> {
    /// The watched key was untouched and the transaction applied.
    Committed(T),
    /// The watched key changed after the watch began; nothing was applied.
    Aborted,
}

impl<T> TxOutcome<T> {
    /// Returns `true` if the transaction was aborted by a concurrent writer.
    pub fn is_aborted(&self) -> bool {
        matches!(self, TxOutcome::Aborted)
    }
}

// ============================================================================
// Watch Session
// ============================================================================

/// An open watch on a single key.
///
/// Created by [`LockStore::watch`]. Every session ends in exactly one of
/// [`transactional_get`](Self::transactional_get),
/// [`transactional_set`](Self::transactional_set) or
/// [`unwatch`](Self::unwatch), which is why they consume `self`.
pub trait WatchSession: Send + Sized {
    /// Plain read of the watched key; does not end the watch.
    fn get(&mut self) -> impl Future<Output = LockResult<Option<String>>> + Send;

    /// Re-reads the key inside a transaction.
    ///
    /// Aborts if the key was written or deleted since the watch began.
    fn transactional_get(self)
        -> impl Future<Output = LockResult<TxOutcome<Option<String>>>> + Send;

    /// Writes `value` inside a transaction.
    ///
    /// Aborts if the key was written or deleted since the watch began.
    fn transactional_set(
        self,
        value: &str,
    ) -> impl Future<Output = LockResult<TxOutcome<()>>> + Send;

    /// Drops the watch without running a transaction.
    fn unwatch(self) -> impl Future<Output = LockResult<()>> + Send;
}

// ============================================================================
// Lock Store
// ============================================================================

/// The atomic primitives the lock protocol needs from a key-value store.
///
/// Implementations must make `create_if_absent` atomic and must honour the
/// watch contract of [`WatchSession`]. Everything else is a single command.
pub trait LockStore: Send + Sync + 'static {
    /// Watch session type returned by [`watch`](Self::watch).
    type Watch: WatchSession;

    /// Short backend name for log fields.
    fn backend(&self) -> &'static str;

    /// Sets `key` to `value` only if it does not exist.
    ///
    /// Returns `true` if this call created the key.
    fn create_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Reads `key`.
    fn get(&self, key: &str) -> impl Future<Output = LockResult<Option<String>>> + Send;

    /// Unconditionally writes `key`.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = LockResult<()>> + Send;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = LockResult<()>> + Send;

    /// Sets a time-to-live on `key`.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = LockResult<()>> + Send;

    /// Starts watching `key` for concurrent modification.
    fn watch(&self, key: &str) -> impl Future<Output = LockResult<Self::Watch>> + Send;
}

// ============================================================================
// Provider
// ============================================================================

/// Factory for workers that share one store and one set of timing defaults.
pub trait LockingWorkerProvider: Send + Sync {
    /// The store workers created by this provider talk to.
    type Store: LockStore;

    /// Creates a worker contending for `lock_key`.
    fn create_worker<K>(&self, lock_key: &str, sink: K) -> LockResult<LockingWorker<Self::Store>>
    where
        K: LockEventSink + 'static;
}
