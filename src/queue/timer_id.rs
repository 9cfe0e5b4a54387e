//! Kinds of delayed work.

use std::fmt;

/// Tags a delayed operation with the kind of work it is, so callers can
/// query or cancel a whole category at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Matches every kind. Only valid as a filter, never for scheduling.
    All,
    /// Closes an idle listen stream.
    ListenStreamIdle,
    /// Backoff before reconnecting the listen stream.
    ListenStreamConnectionBackoff,
    /// Closes an idle write stream.
    WriteStreamIdle,
    /// Backoff before reconnecting the write stream.
    WriteStreamConnectionBackoff,
    /// Gives up waiting for the online state to settle.
    OnlineStateTimeout,
    /// Delay before the next garbage collection pass.
    GarbageCollectionDelay,
    /// Backoff before retrying a failed transaction.
    RetryTransaction,
    /// Delay before the next connectivity attempt.
    ConnectivityAttemptTimer,
    /// Deadline for a health check to answer.
    HealthCheckTimeout,
    /// Periodic keep-alive.
    Heartbeat,
}

impl TimerId {
    /// Returns true if a filter of `self` selects an operation of kind `other`.
    #[must_use]
    pub fn matches(self, other: TimerId) -> bool {
        self == TimerId::All || self == other
    }

    /// Stable name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimerId::All => "all",
            TimerId::ListenStreamIdle => "listen_stream_idle",
            TimerId::ListenStreamConnectionBackoff => "listen_stream_connection_backoff",
            TimerId::WriteStreamIdle => "write_stream_idle",
            TimerId::WriteStreamConnectionBackoff => "write_stream_connection_backoff",
            TimerId::OnlineStateTimeout => "online_state_timeout",
            TimerId::GarbageCollectionDelay => "garbage_collection_delay",
            TimerId::RetryTransaction => "retry_transaction",
            TimerId::ConnectivityAttemptTimer => "connectivity_attempt_timer",
            TimerId::HealthCheckTimeout => "health_check_timeout",
            TimerId::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
