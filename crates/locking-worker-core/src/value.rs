//! Values stored at the lock key.

use std::fmt;

use crate::error::{LockError, LockResult};

/// Sentinel written by an owner that finished its work.
pub const DONE_VALUE: &str = "DONE";

/// Parsed content of the lock key.
///
/// The key is either an attempt counter (how many times the lock has been
/// claimed or reclaimed) or the [`DONE_VALUE`] sentinel. Counters are compared
/// numerically, so `"02"` and `"2"` observe the same attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockValue {
    /// Claimed, reclaimed `n - 1` times.
    Attempt(u32),
    /// Owner finished; key is pending cleanup.
    Done,
}

impl LockValue {
    /// Value written by the first successful claim.
    pub const FIRST_ATTEMPT: LockValue = LockValue::Attempt(1);

    /// Parses a raw store value.
    pub fn parse(raw: &str) -> LockResult<Self> {
        if raw == DONE_VALUE {
            return Ok(LockValue::Done);
        }

        match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(LockValue::Attempt(n)),
            _ => Err(LockError::CorruptValue(raw.to_string())),
        }
    }

    /// Parses an optional raw store value, `None` meaning the key is absent.
    pub fn parse_optional(raw: Option<&str>) -> LockResult<Option<Self>> {
        raw.map(Self::parse).transpose()
    }

    /// Returns the attempt counter, if this is one.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            LockValue::Attempt(n) => Some(*n),
            LockValue::Done => None,
        }
    }

    /// Returns the string stored in the key.
    pub fn to_store_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockValue::Attempt(n) => write!(f, "{n}"),
            LockValue::Done => f.write_str(DONE_VALUE),
        }
    }
}
