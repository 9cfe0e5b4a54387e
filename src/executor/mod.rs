//! Serialized lanes of execution.
//!
//! An [`Executor`] owns exactly one lane: tasks handed to it run one at a
//! time, in the order they were accepted, and a task submitted from the lane
//! itself is queued behind the others rather than run inline.
//!
//! Two implementations are provided:
//!
//! - [`LaneExecutor`] runs tasks on a dedicated, named OS thread.
//! - [`TestExecutor`] runs nothing until the test steps it, and measures
//!   timers against a [`MockClock`](crate::clock::MockClock).
//!
//! # Example
//!
//! ```rust
//! use lane_queue::executor::{Executor, Task, TestExecutor};
//!
//! let executor = TestExecutor::named("worker");
//!
//! executor.execute(Task::new(|| {})).unwrap();
//! executor.execute(Task::new(|| {})).unwrap();
//! assert_eq!(executor.queued_count(), 2);
//!
//! executor.flush();
//! assert_eq!(executor.queued_count(), 0);
//! ```

mod completion;
mod lane;
mod task;
mod test_executor;
mod timer;

use std::time::Duration;

pub(crate) use completion::completion_pair;
pub use completion::Completion;
pub use lane::LaneExecutor;
pub use task::{LaneId, Task, TaskId, TaskInfo, TaskState, TimerToken};
pub use test_executor::TestExecutor;

use crate::config::ShutdownPolicy;
use crate::error::Result;

/// A single serialized lane of execution.
///
/// The name is diagnostic only; it never changes how work is scheduled.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Diagnostic name of the lane (e.g. `"user"` or `"worker"`).
    fn name(&self) -> &str;

    /// Identity token of the lane.
    fn lane_id(&self) -> LaneId;

    /// Returns true if the caller is currently running on this lane.
    fn is_current_lane(&self) -> bool;

    /// Current time on the clock timers are measured against.
    fn now(&self) -> Duration;

    /// Appends `task` to the lane's intake and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`](crate::Error::ShutDown) after shutdown.
    fn execute(&self, task: Task) -> Result<()>;

    /// Submits `task` and blocks until it has run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`](crate::Error::ShutDown) after shutdown,
    /// [`Error::Dropped`](crate::Error::Dropped) if the task was discarded
    /// before it ran, or [`Error::Panicked`](crate::Error::Panicked) if it
    /// panicked. The panic itself is contained by the lane.
    ///
    /// # Panics
    ///
    /// Panics when called from the lane itself, which would otherwise
    /// deadlock.
    fn execute_blocking(&self, task: Task) -> Result<()>;

    /// Hands `task` to the lane no earlier than `delay` from now.
    ///
    /// Timers run in deadline order, ties in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`](crate::Error::ShutDown) after shutdown.
    fn schedule(&self, delay: Duration, task: Task) -> Result<TimerToken>;

    /// Removes a timer that has not fired yet. Returns false if it already
    /// fired or was cancelled.
    fn try_cancel(&self, token: TimerToken) -> bool;

    /// Returns true while the timer is still waiting for its deadline.
    fn is_scheduled(&self, token: TimerToken) -> bool;

    /// Returns once every task accepted so far, and every task those tasks
    /// submit, has run. Timers that are not yet due are not waited for.
    fn flush(&self);

    /// Number of accepted immediate tasks that have not started.
    fn queued_count(&self) -> usize;

    /// Number of timers waiting for their deadline.
    fn timer_count(&self) -> usize;

    /// Stops accepting work. Pending timers are discarded; queued tasks run
    /// or are discarded according to `policy`. Idempotent.
    fn shutdown(&self, policy: ShutdownPolicy);

    /// Returns true once [`shutdown`](Executor::shutdown) was called.
    fn is_shut_down(&self) -> bool;
}
