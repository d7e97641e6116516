//! Worker configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LockError, LockResult};

/// Default delay between polls of the lock key.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default number of claims allowed before contenders give up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Minimum level a status message needs to reach the sink.
///
/// `Verbose` lets every status through; `Normal` drops the verbose ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StatusVerbosity {
    Verbose,
    #[default]
    Normal,
}

impl fmt::Display for StatusVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusVerbosity::Verbose => f.write_str("verbose"),
            StatusVerbosity::Normal => f.write_str("normal"),
        }
    }
}

impl FromStr for StatusVerbosity {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" => Ok(StatusVerbosity::Verbose),
            "normal" => Ok(StatusVerbosity::Normal),
            other => Err(LockError::InvalidConfiguration(format!(
                "unknown status verbosity {other:?}"
            ))),
        }
    }
}

/// Configuration for one [`LockingWorker`](crate::worker::LockingWorker).
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Store key of the contended job.
    pub lock_key: String,
    /// Lowest status level delivered to the sink.
    pub verbosity: StatusVerbosity,
    /// Minimum delay between two checks of the lock key.
    pub poll_interval: Duration,
    /// Highest attempt counter a contender may write.
    pub max_attempts: u32,
}

impl LockOptions {
    /// Returns a builder for the given lock key.
    pub fn builder(lock_key: impl Into<String>) -> LockOptionsBuilder {
        LockOptionsBuilder::new(lock_key)
    }

    /// Creates options with default timing for the given key.
    pub fn new(lock_key: impl Into<String>) -> LockResult<Self> {
        Self::builder(lock_key).build()
    }

    /// TTL put on the key by a contender that gave up.
    pub fn exhausted_ttl(&self) -> Duration {
        self.poll_interval * 2
    }
}

/// Builder for [`LockOptions`].
#[derive(Debug, Clone)]
pub struct LockOptionsBuilder {
    lock_key: String,
    verbosity: StatusVerbosity,
    poll_interval: Duration,
    max_attempts: u32,
}

impl LockOptionsBuilder {
    /// Creates a builder with default settings.
    pub fn new(lock_key: impl Into<String>) -> Self {
        Self {
            lock_key: lock_key.into(),
            verbosity: StatusVerbosity::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the lowest status level delivered to the sink.
    pub fn verbosity(mut self, verbosity: StatusVerbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the delay between polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum attempt counter.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validates and builds the options.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, the poll interval is zero or
    /// `max_attempts` is zero.
    pub fn build(self) -> LockResult<LockOptions> {
        if self.lock_key.is_empty() {
            return Err(LockError::InvalidKey("lock key cannot be empty".to_string()));
        }
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

        Ok(LockOptions {
            lock_key: self.lock_key,
            verbosity: self.verbosity,
            poll_interval: self.poll_interval,
            max_attempts: self.max_attempts,
        })
    }
}
