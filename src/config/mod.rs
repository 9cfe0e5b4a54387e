//! Lane configuration.

use std::fmt;
use std::sync::Arc;

use crate::clock::{MonotonicClock, TimeSource};

/// What happens to already-accepted work when a lane shuts down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Run every task that was accepted before shutdown, then stop.
    /// Timers that are not yet due are discarded.
    #[default]
    Drain,
    /// Discard every task that has not started yet.
    Discard,
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownPolicy::Drain => write!(f, "drain"),
            ShutdownPolicy::Discard => write!(f, "discard"),
        }
    }
}

/// Configuration for a [`LaneExecutor`].
///
/// ```rust
/// use lane_queue::config::{LaneConfig, ShutdownPolicy};
///
/// let config = LaneConfig::new("listen")
///     .shutdown_policy(ShutdownPolicy::Discard);
///
/// assert_eq!(config.name, "listen");
/// assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
/// ```
///
/// [`LaneExecutor`]: crate::executor::LaneExecutor
#[derive(Clone)]
pub struct LaneConfig {
    /// Diagnostic name; also the lane thread's name.
    pub name: String,
    /// Policy applied when the lane is dropped without an explicit shutdown.
    pub shutdown_policy: ShutdownPolicy,
    /// Clock that timer deadlines are measured against.
    pub clock: Arc<dyn TimeSource>,
}

impl LaneConfig {
    /// Create a configuration with the given name and defaults otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the shutdown policy used on drop.
    #[must_use]
    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Measure timer deadlines against a different clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            shutdown_policy: ShutdownPolicy::Drain,
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl fmt::Debug for LaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneConfig")
            .field("name", &self.name)
            .field("shutdown_policy", &self.shutdown_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_config_default() {
        let config = LaneConfig::default();

        assert_eq!(config.name, "worker");
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Drain);
    }

    #[test]
    fn test_lane_config_builder() {
        let clock = crate::clock::MockClock::with_start_time(std::time::Duration::from_secs(7));
        let config = LaneConfig::new("user")
            .shutdown_policy(ShutdownPolicy::Discard)
            .clock(Arc::new(clock));

        assert_eq!(config.name, "user");
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
        assert_eq!(config.clock.now(), std::time::Duration::from_secs(7));
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(ShutdownPolicy::Drain.to_string(), "drain");
        assert_eq!(ShutdownPolicy::Discard.to_string(), "discard");
    }
}
