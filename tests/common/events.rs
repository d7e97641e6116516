//! Helpers for inspecting worker notifications.

use locking_worker_core::events::LockEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// Simplified view of a [`LockEvent`] that can be compared in assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Acquired(bool),
    Locked,
    Status(String),
    Error,
    MaxAttemptsExceeded,
}

impl From<LockEvent> for Seen {
    fn from(event: LockEvent) -> Self {
        match event {
            LockEvent::Acquired { last_attempt } => Seen::Acquired(last_attempt),
            LockEvent::Locked => Seen::Locked,
            LockEvent::Status { message, .. } => Seen::Status(message),
            LockEvent::Error(_) => Seen::Error,
            LockEvent::MaxAttemptsExceeded => Seen::MaxAttemptsExceeded,
        }
    }
}

/// Drains everything currently buffered in the channel.
pub fn drain(rx: &mut UnboundedReceiver<LockEvent>) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event.into());
    }
    seen
}

/// Drains buffered events, dropping status messages.
pub fn drain_signals(rx: &mut UnboundedReceiver<LockEvent>) -> Vec<Seen> {
    drain(rx)
        .into_iter()
        .filter(|seen| !matches!(seen, Seen::Status(_)))
        .collect()
}
