//! The serialized async queue.
//!
//! [`AsyncQueue`] sits on top of an [`Executor`](crate::executor::Executor)
//! and adds what callers of a single-lane queue need: delayed operations
//! tagged with a [`TimerId`] and cancellable through a [`DelayedOperation`],
//! confinement checks, a blocking submit, a restricted mode for cleanup
//! during shutdown, and a test-facing drain.

mod async_queue;
mod delayed;
mod timer_id;

pub use async_queue::AsyncQueue;
pub use delayed::{DelayedOperation, DelayedState};
pub use timer_id::TimerId;

pub use crate::executor::Completion;
