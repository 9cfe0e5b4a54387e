//! # lane-queue
//!
//! > Serialized execution lanes with delayed, cancellable work
//!
//! **lane-queue** funnels work through a single logical lane so that state
//! confined to the lane never races. An [`AsyncQueue`] wraps an
//! [`Executor`](executor::Executor) and adds delayed operations with
//! cancellation handles, confinement checks, a blocking submit that refuses
//! to deadlock, and a drain for deterministic tests.
//!
//! ## Quick Start
//!
//! ```rust
//! use lane_queue::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (queue, executor) = virtual_queue_for_testing();
//! let retries = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&retries);
//! let retry = queue
//!     .schedule_delayed(Duration::from_secs(1), TimerId::RetryTransaction, move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .unwrap();
//!
//! executor.advance_by(Duration::from_millis(999));
//! assert!(retry.is_pending());
//!
//! executor.advance_by(Duration::from_millis(1)); // No real sleeping
//! assert_eq!(retry.state(), DelayedState::Fired);
//! assert_eq!(retries.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Features
//!
//! - 🧵 **Lane Executor** - One named thread per lane, FIFO, panic-tolerant
//! - ⏱️ **Virtual Time** - `TestExecutor` + `MockClock`, no sleeping in tests
//! - ⏰ **Delayed Operations** - Deadline ordered, cancellable by handle or kind
//! - 🔒 **Confinement Checks** - `verify_is_current_queue`, same-lane blocking detection
//! - 🧹 **Drain & Shutdown** - Deterministic teardown, fail-fast after shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Time sources for timers, real and virtual
pub mod clock;

pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod testing;

/// Prelude for convenient imports
///
/// ```rust
/// use lane_queue::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{MockClock, MonotonicClock, TimeSource};
    pub use crate::config::{LaneConfig, ShutdownPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{Executor, LaneExecutor, Task, TaskId, TaskState, TestExecutor};
    pub use crate::queue::{AsyncQueue, Completion, DelayedOperation, DelayedState, TimerId};
    pub use crate::testing::{
        async_queue_for, async_queue_for_testing, executor_for_testing, virtual_queue_for_testing,
    };
}

// Re-exports
pub use error::{Error, Result};
pub use queue::AsyncQueue;

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use lane_queue_macros::test;
