//! Time sources for open-state wait evaluation.
//!
//! The circuit breaker measures how long it has been open through a `Clock`
//! rather than reading `Instant` directly, so recovery timing can be driven
//! forward deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe time source, read as milliseconds since the implementer's origin.
///
/// Implementations must be monotonic: readings never decrease.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Clones share the epoch captured at construction; independently created
/// instances are not comparable with each other.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for tests.
///
/// Starts at zero and only moves when [`advance`](ManualClock::advance) is
/// called, letting tests step a breaker through its open-state wait without
/// real delays. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn monotonic_readings_never_decrease() {
        let clock = MonotonicClock::new();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }

    #[test]
    fn monotonic_clones_share_origin() {
        let clock = MonotonicClock::new();
        let clone = clock.clone();
        thread::sleep(Duration::from_millis(2));
        assert!(clock.now_millis().abs_diff(clone.now_millis()) < 50);
    }

    #[test]
    fn manual_clock_only_moves_on_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 250);

        let clone = clock.clone();
        clone.advance(Duration::from_secs(1));
        assert_eq!(clock.now_millis(), 1250, "clones share the reading");
    }

    #[test]
    fn usable_as_trait_object() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert_eq!(clock.now_millis(), 0);
    }
}
