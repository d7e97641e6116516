//! Poll scheduling.

use std::time::Duration;

use tokio::time::Instant;

/// Schedules the next check of the lock key.
///
/// Only a lower bound is guaranteed: a scheduled tick fires no earlier than
/// one interval after it was scheduled, and possibly much later.
#[derive(Debug)]
pub struct PollTimer {
    interval: Duration,
    fired: u64,
}

impl PollTimer {
    /// Creates a timer with the given poll interval.
    pub fn new(interval: Duration) -> Self {
        Self { interval, fired: 0 }
    }

    /// Returns the poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of ticks that have fired so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Waits one interval, then hands `tick` back to be run.
    pub async fn schedule<T>(&mut self, tick: T) -> T {
        let deadline = Instant::now() + self.interval;
        tokio::time::sleep_until(deadline).await;
        self.fired += 1;
        tick
    }
}
