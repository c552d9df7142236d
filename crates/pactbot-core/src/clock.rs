//! Injectable time source.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::time_utils::current_unix_timestamp_ms;

/// Supplies the current time in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_unix_ms(&self) -> u64;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_ms(&self) -> u64 {
        current_unix_timestamp_ms()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_unix_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_unix_ms: u64) -> Self {
        Self {
            now_unix_ms: AtomicU64::new(now_unix_ms),
        }
    }

    pub fn set(&self, now_unix_ms: u64) {
        self.now_unix_ms.store(now_unix_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, delta_ms: u64) -> u64 {
        let previous = self.now_unix_ms.fetch_add(delta_ms, Ordering::SeqCst);
        previous.saturating_add(delta_ms)
    }
}

impl Clock for ManualClock {
    fn now_unix_ms(&self) -> u64 {
        self.now_unix_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, ManualClock};

    #[test]
    fn unit_manual_clock_sets_and_advances() {
        let clock = ManualClock::new(60_000);
        assert_eq!(clock.now_unix_ms(), 60_000);
        assert_eq!(clock.advance(500), 60_500);
        clock.set(1);
        assert_eq!(clock.now_unix_ms(), 1);
    }
}
