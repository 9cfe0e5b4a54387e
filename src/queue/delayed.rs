//! Delayed operations and their cancellation handles.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::async_queue::QueueInner;
use super::timer_id::TimerId;
use crate::executor::{Task, TaskId, TimerToken};

/// Where a delayed operation is in its life.
///
/// `Pending` moves to exactly one of the two terminal states and never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayedState {
    /// Waiting for its deadline.
    Pending,
    /// Handed to the lane; it runs (or ran) and can no longer be cancelled.
    Fired,
    /// Cancelled before it fired; it will never run.
    Cancelled,
}

impl fmt::Display for DelayedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayedState::Pending => write!(f, "Pending"),
            DelayedState::Fired => write!(f, "Fired"),
            DelayedState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Ordering key: deadline first, then submission order.
pub(crate) type DelayedKey = (Duration, TaskId);

#[derive(Debug)]
pub(crate) struct SharedState(Mutex<DelayedState>);

impl SharedState {
    fn new() -> Self {
        Self(Mutex::new(DelayedState::Pending))
    }

    fn get(&self) -> DelayedState {
        *self.0.lock()
    }

    /// Moves out of `Pending`; terminal states are left alone.
    fn settle(&self, to: DelayedState) {
        let mut state = self.0.lock();
        if *state == DelayedState::Pending {
            *state = to;
        }
    }
}

/// A scheduled operation owned by the queue until it fires or is cancelled.
pub(crate) struct PendingOp {
    pub(crate) timer_id: TimerId,
    pub(crate) task: Task,
    /// The executor timer that will wake the lane for this operation.
    pub(crate) token: TimerToken,
    state: Arc<SharedState>,
}

/// The queue's pending delayed operations, in firing order.
///
/// Every removal settles the operation's state while the set is locked, so
/// fire and cancel can never both win.
#[derive(Default)]
pub(crate) struct DelayedSet {
    ops: BTreeMap<DelayedKey, PendingOp>,
}

impl DelayedSet {
    pub(crate) fn insert(
        &mut self,
        key: DelayedKey,
        timer_id: TimerId,
        task: Task,
        token: TimerToken,
    ) -> Arc<SharedState> {
        let state = Arc::new(SharedState::new());
        self.ops.insert(
            key,
            PendingOp {
                timer_id,
                task,
                token,
                state: Arc::clone(&state),
            },
        );
        state
    }

    /// Takes the earliest operation if it is due at `now`, marking it fired.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<PendingOp> {
        let (&(deadline, _), _) = self.ops.first_key_value()?;
        if deadline > now {
            return None;
        }
        self.pop_first()
    }

    /// Takes the earliest operation regardless of its deadline, marking it
    /// fired.
    pub(crate) fn pop_first(&mut self) -> Option<PendingOp> {
        let (_, op) = self.ops.pop_first()?;
        op.state.settle(DelayedState::Fired);
        Some(op)
    }

    /// Removes one operation, marking it cancelled.
    pub(crate) fn cancel(&mut self, key: &DelayedKey) -> Option<PendingOp> {
        let op = self.ops.remove(key)?;
        op.state.settle(DelayedState::Cancelled);
        Some(op)
    }

    /// Removes every operation of the given kind, marking them cancelled.
    pub(crate) fn cancel_matching(&mut self, filter: TimerId) -> Vec<PendingOp> {
        let keys: Vec<DelayedKey> = self
            .ops
            .iter()
            .filter(|(_, op)| filter.matches(op.timer_id))
            .map(|(key, _)| *key)
            .collect();
        keys.iter().filter_map(|key| self.cancel(key)).collect()
    }

    pub(crate) fn contains_kind(&self, filter: TimerId) -> bool {
        self.ops.values().any(|op| filter.matches(op.timer_id))
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Drop for DelayedSet {
    fn drop(&mut self) {
        for op in self.ops.values() {
            op.state.settle(DelayedState::Cancelled);
        }
    }
}

/// Handle to an operation scheduled with [`AsyncQueue::schedule_delayed`].
///
/// The handle can be cloned and outlive the queue. Cancelling is idempotent:
/// cancelling a fired or already-cancelled operation does nothing.
///
/// # Example
///
/// ```rust
/// use lane_queue::queue::{DelayedState, TimerId};
/// use lane_queue::testing::virtual_queue_for_testing;
/// use std::time::Duration;
///
/// let (queue, executor) = virtual_queue_for_testing();
/// let op = queue
///     .schedule_delayed(Duration::from_millis(50), TimerId::RetryTransaction, || {
///         unreachable!("cancelled before its deadline")
///     })
///     .unwrap();
///
/// assert!(op.cancel());
/// assert!(!op.cancel());
/// assert_eq!(op.state(), DelayedState::Cancelled);
///
/// executor.advance_by(Duration::from_millis(100));
/// assert_eq!(queue.delayed_count(), 0);
/// ```
///
/// [`AsyncQueue::schedule_delayed`]: crate::queue::AsyncQueue::schedule_delayed
#[derive(Clone)]
pub struct DelayedOperation {
    key: DelayedKey,
    timer_id: TimerId,
    state: Arc<SharedState>,
    queue: Weak<QueueInner>,
}

impl DelayedOperation {
    pub(crate) fn new(
        key: DelayedKey,
        timer_id: TimerId,
        state: Arc<SharedState>,
        queue: Weak<QueueInner>,
    ) -> Self {
        Self {
            key,
            timer_id,
            state,
            queue,
        }
    }

    /// Cancels the operation if it has not fired yet.
    ///
    /// Returns true if this call did the cancelling.
    pub fn cancel(&self) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.cancel_delayed(&self.key),
            None => {
                self.state.settle(DelayedState::Cancelled);
                false
            }
        }
    }

    /// The operation's current state.
    #[must_use]
    pub fn state(&self) -> DelayedState {
        self.state.get()
    }

    /// Returns true while the operation is waiting to fire.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == DelayedState::Pending
    }

    /// The kind of work this operation was scheduled as.
    #[must_use]
    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    /// The earliest time, on the queue's clock, at which it may fire.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.key.0
    }

    /// Id of the scheduled task; also its submission order.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.key.1
    }
}

impl fmt::Debug for DelayedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedOperation")
            .field("id", &self.key.1)
            .field("timer_id", &self.timer_id)
            .field("deadline", &self.key.0)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(set: &mut DelayedSet, ms: u64, timer_id: TimerId) -> (DelayedKey, Arc<SharedState>) {
        let task = Task::new(|| {});
        let key = (Duration::from_millis(ms), task.id());
        let token = TimerToken(task.id());
        let state = set.insert(key, timer_id, task, token);
        (key, state)
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut set = DelayedSet::default();
        let (_, late) = insert(&mut set, 100, TimerId::Heartbeat);
        let (_, early) = insert(&mut set, 10, TimerId::Heartbeat);

        assert!(set.pop_due(Duration::from_millis(5)).is_none());
        assert!(set.pop_due(Duration::from_millis(10)).is_some());
        assert_eq!(early.get(), DelayedState::Fired);
        assert_eq!(late.get(), DelayedState::Pending);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_cancel_is_one_way() {
        let mut set = DelayedSet::default();
        let (key, state) = insert(&mut set, 10, TimerId::RetryTransaction);

        assert!(set.cancel(&key).is_some());
        assert!(set.cancel(&key).is_none());
        assert_eq!(state.get(), DelayedState::Cancelled);

        state.settle(DelayedState::Fired);
        assert_eq!(state.get(), DelayedState::Cancelled);
    }

    #[test]
    fn test_cancel_matching_by_kind() {
        let mut set = DelayedSet::default();
        let (_, backoff) = insert(&mut set, 10, TimerId::WriteStreamConnectionBackoff);
        let (_, heartbeat) = insert(&mut set, 20, TimerId::Heartbeat);

        let cancelled = set.cancel_matching(TimerId::WriteStreamConnectionBackoff);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(backoff.get(), DelayedState::Cancelled);
        assert_eq!(heartbeat.get(), DelayedState::Pending);
        assert!(set.contains_kind(TimerId::Heartbeat));
        assert!(!set.contains_kind(TimerId::WriteStreamConnectionBackoff));

        assert_eq!(set.cancel_matching(TimerId::All).len(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_dropping_set_cancels_pending() {
        let mut set = DelayedSet::default();
        let (_, state) = insert(&mut set, 10, TimerId::Heartbeat);
        drop(set);
        assert_eq!(state.get(), DelayedState::Cancelled);
    }
}
