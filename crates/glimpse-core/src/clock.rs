//! # Clock Abstraction
//!
//! Every time-window check in the core (embed timestamps, legacy signature
//! expiry, token TTLs, session lifetimes) reads the current time through
//! the `Clock` trait so tests can drive the clock explicitly instead of
//! sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix time, in whole seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_unix(&self) -> i64;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests.
///
/// Cloning shares the underlying instant, so a test can hold one handle
/// while the system under test holds another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at the given unix time.
    #[must_use]
    pub fn at(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current time by `secs` (may be negative).
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(100);
        assert_eq!(clock.now_unix(), 100);

        clock.advance(50);
        assert_eq!(clock.now_unix(), 150);

        clock.advance(-200);
        assert_eq!(clock.now_unix(), -50);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at(10);
        let other = clock.clone();
        other.set(99);
        assert_eq!(clock.now_unix(), 99);
    }

    #[test]
    fn system_clock_is_after_2020() {
        let clock = SystemClock;
        assert!(clock.now_unix() > 1_577_836_800);
    }
}
