//! Notifications delivered to the caller of a worker.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::LockError;
use crate::options::StatusVerbosity;

/// A discrete notification from a [`LockingWorker`](crate::worker::LockingWorker).
#[derive(Debug)]
pub enum LockEvent {
    /// This contender now owns the job.
    ///
    /// `last_attempt` is `true` when the claim wrote the maximum counter; the
    /// owner should pass it back to `done`.
    Acquired { last_attempt: bool },
    /// Someone else holds the lock; polling continues.
    Locked,
    /// Progress report at the given level.
    Status {
        message: String,
        verbosity: StatusVerbosity,
    },
    /// A store command failed and the control flow stopped.
    Error(LockError),
    /// The counter reached the maximum; this contender gave up.
    MaxAttemptsExceeded,
}

impl LockEvent {
    /// Returns the status text, if this is a status event.
    pub fn status_message(&self) -> Option<&str> {
        match self {
            LockEvent::Status { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockEvent::Acquired { last_attempt } => {
                write!(f, "acquired (last attempt: {last_attempt})")
            }
            LockEvent::Locked => f.write_str("locked"),
            LockEvent::Status { message, verbosity } => write!(f, "status [{verbosity}]: {message}"),
            LockEvent::Error(err) => write!(f, "error: {err}"),
            LockEvent::MaxAttemptsExceeded => f.write_str("max attempts exceeded"),
        }
    }
}

/// Receives notifications from a worker.
///
/// Called inline from the worker task, so implementations should not block.
pub trait LockEventSink: Send + Sync {
    /// Delivers one event.
    fn notify(&self, event: LockEvent);
}

impl LockEventSink for mpsc::UnboundedSender<LockEvent> {
    fn notify(&self, event: LockEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink that forwards events to a closure.
pub struct CallbackSink<F>(F);

impl<F> LockEventSink for CallbackSink<F>
where
    F: Fn(LockEvent) + Send + Sync,
{
    fn notify(&self, event: LockEvent) {
        (self.0)(event)
    }
}

/// Wraps a closure as a [`LockEventSink`].
pub fn callback_sink<F>(f: F) -> CallbackSink<F>
where
    F: Fn(LockEvent) + Send + Sync,
{
    CallbackSink(f)
}

/// Creates an unbounded channel usable as a sink.
pub fn event_channel() -> (
    mpsc::UnboundedSender<LockEvent>,
    mpsc::UnboundedReceiver<LockEvent>,
) {
    mpsc::unbounded_channel()
}
