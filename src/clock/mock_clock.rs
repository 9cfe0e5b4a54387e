//! The virtual clock.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::TimeSource;

/// A virtual clock for test lanes.
///
/// Time only moves when the test moves it, and only forward, so a deadline
/// that has passed stays passed. A [`TestExecutor`] reads this clock to
/// decide which timers are due.
///
/// Clones share one time value, so a clock handed to several executors
/// drives all of them.
///
/// ```rust
/// use lane_queue::clock::MockClock;
/// use std::time::Duration;
///
/// let clock = MockClock::new();
/// let shared = clock.clone();
///
/// shared.advance(Duration::from_millis(150));
/// assert_eq!(clock.now(), Duration::from_millis(150));
/// ```
///
/// [`TestExecutor`]: crate::executor::TestExecutor
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// A clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock reading `start`.
    #[must_use]
    pub fn with_start_time(start: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        *self.now.lock()
    }

    /// Moves time forward by `duration`, saturating at `Duration::MAX`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(duration);
    }

    /// Moves time forward to `target`. Earlier targets leave it unchanged.
    pub fn advance_to(&self, target: Duration) {
        let mut now = self.now.lock();
        if target > *now {
            *now = target;
        }
    }
}

impl TimeSource for MockClock {
    fn now(&self) -> Duration {
        MockClock::now(self)
    }
}
