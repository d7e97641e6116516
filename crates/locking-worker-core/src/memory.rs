//! In-process lock store.
//!
//! Gives the lock protocol the same atomic primitives a shared key-value store
//! would, for contenders living in one process and for tests. Every write or
//! delete bumps a per-key version; a watch remembers the version it saw and a
//! transaction only applies if the version is unchanged.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::instrument;

use crate::error::{LockError, LockResult};
use crate::traits::{LockStore, TxOutcome, WatchSession};

/// A store command, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryCommand {
    CreateIfAbsent,
    Get,
    Set,
    Delete,
    Expire,
    Watch,
    Unwatch,
    Exec,
}

/// A write applied on behalf of another contender right before a
/// transaction executes, invalidating the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interference {
    Set(String),
    Delete,
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    /// Survives deletes so a delete-then-recreate still invalidates watches.
    /// Entries are never removed, so this grows with the number of distinct
    /// keys ever touched; one key per job keeps it small.
    versions: HashMap<String, u64>,
    next_version: u64,
    failures: VecDeque<MemoryCommand>,
    before_get: VecDeque<Interference>,
    before_set: VecDeque<Interference>,
    before_watch_get: VecDeque<Interference>,
}

impl MemoryState {
    fn bump(&mut self, key: &str) {
        self.next_version += 1;
        self.versions.insert(key.to_string(), self.next_version);
    }

    fn version(&mut self, key: &str) -> u64 {
        self.purge_expired(key);
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
            self.bump(key);
        }
    }

    fn read(&mut self, key: &str) -> Option<String> {
        self.purge_expired(key);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn write(&mut self, key: &str, value: &str) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        self.bump(key);
    }

    fn remove(&mut self, key: &str) {
        self.purge_expired(key);
        if self.entries.remove(key).is_some() {
            self.bump(key);
        }
    }

    fn apply(&mut self, key: &str, interference: Interference) {
        match interference {
            Interference::Set(value) => self.write(key, &value),
            Interference::Delete => self.remove(key),
        }
    }

    fn check_failure(&mut self, command: MemoryCommand) -> LockResult<()> {
        if let Some(pos) = self.failures.iter().position(|c| *c == command) {
            self.failures.remove(pos);
            return Err(LockError::backend(
                &format!("memory {command:?} failed"),
                "injected failure",
            ));
        }
        Ok(())
    }
}

fn queued_before_get(state: &mut MemoryState) -> &mut VecDeque<Interference> {
    &mut state.before_get
}

fn queued_before_set(state: &mut MemoryState) -> &mut VecDeque<Interference> {
    &mut state.before_set
}

/// Lock store backed by a shared in-process map.
///
/// Clones share the same data, so every contender given a clone sees the
/// same keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads a key without going through the protocol.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().read(key)
    }

    /// Writes a key without going through the protocol.
    pub fn insert(&self, key: &str, value: impl AsRef<str>) {
        self.lock().write(key, value.as_ref());
    }

    /// Remaining time-to-live of a key, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock();
        state.purge_expired(key);
        state
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Makes the next `command` fail with a backend error.
    pub fn fail_next(&self, command: MemoryCommand) {
        self.lock().failures.push_back(command);
    }

    /// Applies `interference` to the watched key right before the next
    /// transactional read executes.
    pub fn interfere_before_get(&self, interference: Interference) {
        self.lock().before_get.push_back(interference);
    }

    /// Applies `interference` to the watched key right before the next
    /// transactional write executes.
    pub fn interfere_before_set(&self, interference: Interference) {
        self.lock().before_set.push_back(interference);
    }

    /// Applies `interference` to the watched key right before the next
    /// plain read inside a watch session.
    pub fn interfere_before_watch_get(&self, interference: Interference) {
        self.lock().before_watch_get.push_back(interference);
    }
}

impl LockStore for MemoryLockStore {
    type Watch = MemoryWatch;

    fn backend(&self) -> &'static str {
        "memory"
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn create_if_absent(&self, key: &str, value: &str) -> LockResult<bool> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::CreateIfAbsent)?;
        if state.read(key).is_some() {
            return Ok(false);
        }
        state.write(key, value);
        Ok(true)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::Get)?;
        Ok(state.read(key))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn set(&self, key: &str, value: &str) -> LockResult<()> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::Set)?;
        state.write(key, value);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> LockResult<()> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::Delete)?;
        state.remove(key);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn expire(&self, key: &str, ttl: Duration) -> LockResult<()> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::Expire)?;
        state.purge_expired(key);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> LockResult<MemoryWatch> {
        let mut state = self.lock();
        state.check_failure(MemoryCommand::Watch)?;
        let version = state.version(key);
        Ok(MemoryWatch {
            store: self.clone(),
            key: key.to_string(),
            version,
        })
    }
}

/// Watch on one key of a [`MemoryLockStore`].
#[derive(Debug)]
pub struct MemoryWatch {
    store: MemoryLockStore,
    key: String,
    version: u64,
}

impl MemoryWatch {
    /// Runs `f` if the watched key is unchanged, after applying any queued
    /// interference from `pick`.
    fn exec<T>(
        self,
        pick: fn(&mut MemoryState) -> &mut VecDeque<Interference>,
        f: impl FnOnce(&mut MemoryState, &str) -> T,
    ) -> LockResult<TxOutcome<T>> {
        let mut state = self.store.lock();
        state.check_failure(MemoryCommand::Exec)?;
        if let Some(interference) = pick(&mut state).pop_front() {
            state.apply(&self.key, interference);
        }
        if state.version(&self.key) != self.version {
            return Ok(TxOutcome::Aborted);
        }
        Ok(TxOutcome::Committed(f(&mut state, &self.key)))
    }
}

impl WatchSession for MemoryWatch {
    async fn get(&mut self) -> LockResult<Option<String>> {
        let mut state = self.store.lock();
        state.check_failure(MemoryCommand::Get)?;
        if let Some(interference) = state.before_watch_get.pop_front() {
            state.apply(&self.key, interference);
        }
        Ok(state.read(&self.key))
    }

    async fn transactional_get(self) -> LockResult<TxOutcome<Option<String>>> {
        self.exec(queued_before_get, |state, key| state.read(key))
    }

    async fn transactional_set(self, value: &str) -> LockResult<TxOutcome<()>> {
        self.exec(queued_before_set, |state, key| state.write(key, value))
    }

    async fn unwatch(self) -> LockResult<()> {
        self.store.lock().check_failure(MemoryCommand::Unwatch)
    }
}
