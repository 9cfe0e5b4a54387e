//! Time sources for delayed work.
//!
//! Executors measure deadlines against a [`TimeSource`]: real lanes use a
//! [`MonotonicClock`], test lanes use a [`MockClock`] that only moves when
//! the test advances it.
//!
//! # Example
//!
//! ```rust
//! use lane_queue::clock::{MockClock, TimeSource};
//! use std::time::Duration;
//!
//! let clock = MockClock::new();
//! clock.advance(Duration::from_secs(10));
//! assert_eq!(TimeSource::now(&clock), Duration::from_secs(10));
//! ```

mod mock_clock;

use std::time::{Duration, Instant};

pub use mock_clock::MockClock;

/// A monotonic source of time, measured as a duration since the source's
/// own epoch.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Current time since the epoch of this source.
    fn now(&self) -> Duration;

    /// The instant `delay` from now.
    fn deadline_after(&self, delay: Duration) -> Duration {
        self.now().saturating_add(delay)
    }

    /// Whether this source follows wall-clock time on its own.
    ///
    /// A lane waiting on a realtime source can sleep until the next
    /// deadline. Any other source may be moved by someone else, so the lane
    /// has to keep re-reading it.
    fn is_realtime(&self) -> bool {
        false
    }
}

/// Real monotonic time, with its epoch at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn is_realtime(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > first);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let clock = MockClock::with_start_time(Duration::from_secs(1));
        assert_eq!(
            clock.deadline_after(Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
        assert_eq!(clock.deadline_after(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_only_the_monotonic_clock_is_realtime() {
        assert!(MonotonicClock::new().is_realtime());
        assert!(!MockClock::new().is_realtime());
    }
}
