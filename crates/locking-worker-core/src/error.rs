//! Error types for locking worker operations.

use thiserror::Error;

/// Errors that can occur while talking to the lock store.
///
/// Losing an optimistic transaction is not an error; it is reported as
/// [`TxOutcome::Aborted`](crate::traits::TxOutcome::Aborted).
#[derive(Error, Debug)]
pub enum LockError {
    /// Store connection could not be established.
    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A store command failed.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid lock key.
    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    /// Worker or provider configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The lock key holds something that is neither a counter nor the sentinel.
    #[error("corrupt lock value: {0:?}")]
    CorruptValue(String),
}

impl LockError {
    /// Wraps a store command failure with a short description of the command.
    pub fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        LockError::Backend(Box::new(std::io::Error::other(format!(
            "{context}: {err}"
        ))))
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
