//! One-shot result slots for work submitted to a lane.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::Executor;
use crate::error::{Error, Result};

enum SlotState<T> {
    Waiting(Option<Waker>),
    Done(Result<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn fill(&self, outcome: Result<T>) {
        let waker = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SlotState::Done(outcome)) {
                SlotState::Waiting(waker) => waker,
                // Filled or taken already; keep the first outcome.
                previous => {
                    *state = previous;
                    None
                }
            }
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Creates a connected completer/completion pair.
pub(crate) fn completion_pair<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Waiting(None)),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        Completion { slot, lane: None },
    )
}

/// The lane-side half: fills the slot exactly once.
///
/// Dropping it unfilled resolves the completion with [`Error::Dropped`], or
/// [`Error::Panicked`] when dropped during a panic.
pub(crate) struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Ok(value));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let err = if std::thread::panicking() {
                Error::Panicked
            } else {
                Error::Dropped
            };
            slot.fill(Err(err));
        }
    }
}

/// The result of work submitted with [`AsyncQueue::enqueue_with_result`].
///
/// A `Completion` can be awaited from any async runtime, polled with
/// [`try_take`], or waited on from a thread that is not the queue's lane.
///
/// # Example
///
/// ```rust
/// use lane_queue::testing::virtual_queue_for_testing;
///
/// let (queue, executor) = virtual_queue_for_testing();
/// let completion = queue.enqueue_with_result(|| 6 * 7).unwrap();
///
/// assert!(!completion.is_complete());
/// executor.run_until_stalled();
/// assert_eq!(completion.try_take().unwrap().unwrap(), 42);
/// ```
///
/// [`AsyncQueue::enqueue_with_result`]: crate::queue::AsyncQueue::enqueue_with_result
/// [`try_take`]: Completion::try_take
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
    /// The lane that fills the slot; blocking on it from there never ends.
    lane: Option<Weak<dyn Executor>>,
}

impl<T> Completion<T> {
    /// Records the executor whose lane will fill this completion.
    pub(crate) fn bound_to(mut self, executor: &Arc<dyn Executor>) -> Self {
        self.lane = Some(Arc::downgrade(executor));
        self
    }

    fn assert_off_lane(&self, method: &str) {
        if let Some(lane) = self.lane.as_ref().and_then(Weak::upgrade) {
            assert!(
                !lane.is_current_lane(),
                "Completion::{method} called from the '{}' lane that runs the work",
                lane.name()
            );
        }
    }

    /// Returns true once the work has run, panicked, or been dropped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Waiting(_))
    }

    /// Takes the outcome if it is available.
    ///
    /// Returns `None` while the work is outstanding or after the outcome was
    /// already taken.
    #[must_use]
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Done(outcome) => Some(outcome),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Blocks the calling thread until the outcome is available.
    ///
    /// # Errors
    ///
    /// Returns the work's own failure ([`Error::Dropped`], [`Error::Panicked`]).
    ///
    /// # Panics
    ///
    /// Panics when called from the lane that runs the work, which would
    /// otherwise wait on itself forever.
    pub fn wait(self) -> Result<T> {
        self.assert_off_lane("wait");
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(outcome) => return outcome,
                SlotState::Taken => return Err(Error::Dropped),
                waiting @ SlotState::Waiting(_) => *state = waiting,
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Blocks the calling thread until the outcome is available or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the outcome did not arrive in time, or
    /// the work's own failure ([`Error::Dropped`], [`Error::Panicked`]).
    ///
    /// # Panics
    ///
    /// Panics when called from the lane that runs the work.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        self.assert_off_lane("wait_timeout");
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(outcome) => return outcome,
                SlotState::Taken => return Err(Error::Dropped),
                waiting @ SlotState::Waiting(_) => *state = waiting,
            }
            if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                if let SlotState::Done(_) = *state {
                    continue;
                }
                return Err(Error::Timeout(timeout));
            }
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Done(outcome) => Poll::Ready(outcome),
            SlotState::Taken => Poll::Ready(Err(Error::Dropped)),
            SlotState::Waiting(_) => {
                *state = SlotState::Waiting(Some(cx.waker().clone()));
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("is_complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_then_take() {
        let (completer, completion) = completion_pair();
        assert!(!completion.is_complete());

        completer.complete(42);
        assert!(completion.is_complete());
        assert_eq!(completion.try_take().unwrap().unwrap(), 42);
        assert!(completion.try_take().is_none());
    }

    #[test]
    fn test_dropped_completer_reports_dropped() {
        let (completer, completion) = completion_pair::<u8>();
        drop(completer);
        assert!(matches!(completion.try_take(), Some(Err(Error::Dropped))));
    }

    #[test]
    fn test_completer_dropped_by_panic_reports_panicked() {
        let (completer, completion) = completion_pair::<u8>();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _completer = completer;
            panic!("work failed");
        }));
        assert!(result.is_err());
        assert!(matches!(completion.try_take(), Some(Err(Error::Panicked))));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_completer, completion) = completion_pair::<u8>();
        let err = completion.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_wait_timeout_across_threads() {
        let (completer, completion) = completion_pair();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            completer.complete("done");
        });
        assert_eq!(completion.wait_timeout(Duration::from_secs(5)).unwrap(), "done");
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_await_completion() {
        let (completer, completion) = completion_pair();
        let handle = std::thread::spawn(move || completer.complete(7_u32));
        assert_eq!(completion.await.unwrap(), 7);
        handle.join().unwrap();
    }
}
