//! Redis worker provider.

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use locking_worker_core::error::{LockError, LockResult};
use locking_worker_core::events::LockEventSink;
use locking_worker_core::options::{
    LockOptions, StatusVerbosity, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
use locking_worker_core::traits::LockingWorkerProvider;
use locking_worker_core::worker::LockingWorker;

use crate::store::RedisLockStore;

/// Builder for Redis worker provider configuration.
pub struct RedisLockProviderBuilder {
    url: Option<String>,
    client: Option<RedisClient>,
    verbosity: StatusVerbosity,
    poll_interval: Duration,
    max_attempts: u32,
}

impl RedisLockProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            client: None,
            verbosity: StatusVerbosity::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the Redis server URL, e.g. `redis://localhost:6379`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Uses an existing, connected Redis client instead of a URL.
    pub fn client(mut self, client: RedisClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the status verbosity of created workers.
    pub fn verbosity(mut self, verbosity: StatusVerbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the poll interval of created workers.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum attempt counter of created workers.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn validate(&self) -> LockResult<()> {
        if self.poll_interval.is_zero() {
            return Err(LockError::InvalidConfiguration(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(LockError::InvalidConfiguration(
                "max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the provider, connecting to Redis if a URL was given.
    pub async fn build(self) -> LockResult<RedisLockProvider> {
        self.validate()?;

        // A pre-built client wins over a URL
        let client = match (self.client, self.url) {
            (Some(client), _) => client,
            (None, Some(url)) => {
                let config = RedisConfig::from_url(&url).map_err(|e| {
                    LockError::Connection(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("invalid Redis URL: {}", e),
                    )))
                })?;

                let client = RedisClient::new(config, None, None, None);
                client.connect();
                client.wait_for_connect().await.map_err(|e| {
                    LockError::Connection(Box::new(std::io::Error::other(format!(
                        "failed to connect to Redis: {}",
                        e
                    ))))
                })?;
                client
            }
            (None, None) => {
                return Err(LockError::InvalidConfiguration(
                    "no Redis client or URL provided".to_string(),
                ));
            }
        };

        let store = RedisLockStore::connect(client).await?;

        Ok(RedisLockProvider {
            store: Arc::new(store),
            verbosity: self.verbosity,
            poll_interval: self.poll_interval,
            max_attempts: self.max_attempts,
        })
    }
}

impl Default for RedisLockProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates Redis-backed locking workers that share one store.
pub struct RedisLockProvider {
    store: Arc<RedisLockStore>,
    verbosity: StatusVerbosity,
    poll_interval: Duration,
    max_attempts: u32,
}

impl RedisLockProvider {
    /// Returns a new builder for configuring the provider.
    pub fn builder() -> RedisLockProviderBuilder {
        RedisLockProviderBuilder::new()
    }

    /// Creates a provider with default timing for the given Redis URL.
    pub async fn new(url: impl Into<String>) -> LockResult<Self> {
        Self::builder().url(url).build().await
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<RedisLockStore> {
        &self.store
    }

    /// Options a worker for `lock_key` is created with.
    pub fn options_for(&self, lock_key: &str) -> LockResult<LockOptions> {
        LockOptions::builder(lock_key)
            .verbosity(self.verbosity)
            .poll_interval(self.poll_interval)
            .max_attempts(self.max_attempts)
            .build()
    }
}

impl LockingWorkerProvider for RedisLockProvider {
    type Store = RedisLockStore;

    fn create_worker<K>(&self, lock_key: &str, sink: K) -> LockResult<LockingWorker<Self::Store>>
    where
        K: LockEventSink + 'static,
    {
        let options = self.options_for(lock_key)?;
        Ok(LockingWorker::new(self.store.clone(), options, sink))
    }
}
