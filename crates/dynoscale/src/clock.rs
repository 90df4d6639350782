//! Wall-clock source for scaling timestamps.
//!
//! Timestamps are whole epoch seconds, the same precision the shared
//! record stores them at.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Provides the current time in epoch seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_secs(), 100);
        clock.advance(11);
        assert_eq!(clock.now_secs(), 111);
        clock.set(5);
        assert_eq!(clock.now_secs(), 5);
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now_secs() > 1_600_000_000);
    }
}
