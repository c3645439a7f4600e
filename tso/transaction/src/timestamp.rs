//! Start-timestamp management for the oracle.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

/// An opaque, monotonically-issued 64-bit identifier assigned to a
/// transaction when it begins. It tags the rows the transaction writes and
/// is the unit of identity throughout the oracle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from its raw value.
    pub fn with_ts(timestamp: u64) -> Self {
        Self(timestamp)
    }

    /// Returns the raw value of the timestamp.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Monotonic start-timestamp allocator.
///
/// At startup the allocator is re-seeded from the persisted log via
/// [`TimestampAllocator::advance_to`] before any timestamp is handed out.
#[derive(Debug)]
pub struct TimestampAllocator {
    counter: AtomicU64,
}

impl TimestampAllocator {
    /// Create a new allocator starting at 1.
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Create a new allocator with a starting value.
    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Issue the next start timestamp.
    pub fn next(&self) -> Result<Timestamp, TimestampError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur == u64::MAX {
                return Err(TimestampError::Exhausted(cur));
            }
            match self.counter.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(Timestamp::with_ts(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Get the next timestamp that would be issued, without issuing it.
    pub fn current(&self) -> Timestamp {
        Timestamp::with_ts(self.counter.load(Ordering::SeqCst))
    }

    /// Advance the counter past `ts` if it is not already there.
    ///
    /// Timestamps issued after this call are strictly greater than `ts`.
    pub fn advance_to(&self, ts: Timestamp) {
        self.counter
            .fetch_max(ts.raw().saturating_add(1), Ordering::SeqCst);
    }
}

impl Default for TimestampAllocator {
    fn default() -> Self {
        Self::new()
    }
}
