// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
///
/// Everything that stamps ledger entries, evaluates the `now()` builtin, or
/// records run durations goes through this trait so tests can run on a
/// `FakeClock`.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Seconds since the Unix epoch (whole seconds).
    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// System wall clock for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    ms: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake clock starting at the given epoch milliseconds.
    pub fn at(ms: u64) -> Self {
        let clock = Self::new();
        clock.ms.store(ms, Ordering::SeqCst);
        clock
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(2_500);
        assert_eq!(clock.now_ms(), 3_500);
        assert_eq!(clock.now_secs(), 3);
    }

    #[test]
    fn fake_clock_clones_share_time() {
        let clock = FakeClock::new();
        let clone = clock.clone();
        clock.advance_ms(100);
        assert_eq!(clone.now_ms(), 100);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.now_ms() > 0);
    }
}
