//! Clock abstraction for the ban engine.
//!
//! Ban expiry is computed from wall-clock seconds. The engine reads time
//! through [`Clock`] so tests can move time forward without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Trait for getting the current Unix timestamp.
pub trait Clock: Send + Sync {
    /// Returns the current time as Unix seconds since epoch.
    fn now_unix_sec(&self) -> i64;
}

/// Real system clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_sec(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time, so a test can keep one handle
/// and hand another to the engine.
#[derive(Debug, Clone)]
pub struct ManualClock {
    timestamp: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a manual clock starting at `timestamp`.
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp: Arc::new(AtomicI64::new(timestamp)),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, timestamp: i64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_sec(&self) -> i64 {
        self.timestamp.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_700_000_000);
        let handle = clock.clone();

        handle.advance(1801);
        assert_eq!(clock.now_unix_sec(), 1_700_001_801);

        handle.set(5);
        assert_eq!(clock.now_unix_sec(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_unix_sec() > 1_577_836_800);
    }
}
