//! Local state of one contender.

use std::fmt;

/// Where a contender is in the lock protocol.
///
/// `Owned`, `Terminated` and `Exhausted` end the polling control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Idle,
    /// `create_if_absent` is in flight.
    AwaitingFirstAcquire,
    /// This contender holds the claim written with `attempt`.
    Owned { attempt: u32 },
    /// Waiting for the next check. `last_observed` is the counter seen by the
    /// previous read, `None` if that read found no counter.
    Polling { last_observed: Option<u32> },
    /// Trying to write `observed + 1` over a stalled owner.
    Reacquiring { observed: u32 },
    /// Gave up after the counter reached the maximum.
    Exhausted,
    /// Work finished, key gone, or the control flow was abandoned.
    Terminated,
}

impl LockState {
    /// Returns `true` if no further polls will be scheduled from this state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            LockState::Owned { .. } | LockState::Exhausted | LockState::Terminated
        )
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Idle => f.write_str("idle"),
            LockState::AwaitingFirstAcquire => f.write_str("awaiting first acquire"),
            LockState::Owned { attempt } => write!(f, "owned (attempt {attempt})"),
            LockState::Polling {
                last_observed: Some(n),
            } => write!(f, "polling (last observed {n})"),
            LockState::Polling {
                last_observed: None,
            } => f.write_str("polling"),
            LockState::Reacquiring { observed } => write!(f, "reacquiring (observed {observed})"),
            LockState::Exhausted => f.write_str("exhausted"),
            LockState::Terminated => f.write_str("terminated"),
        }
    }
}
