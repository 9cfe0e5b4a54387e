//! Error definitions
//!
//! Submission-side failures are reported through [`Error`]. Confinement
//! violations (touching queue state off-lane, blocking on the queue from its
//! own lane) are programming errors and panic instead.

use std::time::Duration;

use thiserror::Error;

/// Main error type for lane-queue
#[derive(Error, Debug)]
pub enum Error {
    /// The executor or queue has been shut down and no longer accepts work.
    #[error("'{name}' has been shut down and no longer accepts work")]
    ShutDown {
        /// Diagnostic name of the lane.
        name: String,
    },

    /// The queue is in restricted mode and refuses ordinary submissions.
    #[error("'{name}' is in restricted mode; only cleanup work is accepted")]
    Restricted {
        /// Diagnostic name of the lane.
        name: String,
    },

    /// The task behind a completion was discarded without running.
    #[error("Task was dropped before it ran")]
    Dropped,

    /// The task behind a completion panicked.
    #[error("Task panicked")]
    Panicked,

    /// Waiting for a completion timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The lane thread could not be spawned.
    #[error("Failed to spawn lane thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    /// Create a shut-down error for the named lane.
    #[must_use]
    pub fn shut_down(name: impl Into<String>) -> Self {
        Self::ShutDown { name: name.into() }
    }

    /// Create a restricted-mode error for the named lane.
    #[must_use]
    pub fn restricted(name: impl Into<String>) -> Self {
        Self::Restricted { name: name.into() }
    }

    /// Returns true if this error means the target no longer accepts work.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_lane_name() {
        let err = Error::shut_down("worker");
        assert_eq!(
            err.to_string(),
            "'worker' has been shut down and no longer accepts work"
        );
        assert!(err.is_shut_down());

        let err = Error::restricted("worker");
        assert!(err.to_string().contains("restricted mode"));
        assert!(!err.is_shut_down());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Operation timed out after 250ms");
    }
}
