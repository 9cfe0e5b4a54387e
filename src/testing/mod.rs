//! Factories for executors and queues in tests.
//!
//! ```rust
//! use lane_queue::executor::Executor;
//! use lane_queue::testing::{async_queue_for, executor_for_testing};
//!
//! let user = executor_for_testing("user").unwrap();
//! let worker = executor_for_testing("worker").unwrap();
//! assert_ne!(user.lane_id(), worker.lane_id());
//!
//! let queue = async_queue_for(worker);
//! queue.enqueue_and_wait(|| {}).unwrap();
//! assert_eq!(queue.name(), "worker");
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::executor::{Executor, LaneExecutor, TestExecutor};
use crate::queue::AsyncQueue;

/// Creates a real, thread-backed executor labelled `name`.
///
/// The label only shows up in thread names, logs and `Debug` output; a
/// `"user"` lane and a `"worker"` lane behave identically.
///
/// # Errors
///
/// Returns [`Error::Spawn`](crate::Error::Spawn) if the lane thread could not
/// be started.
pub fn executor_for_testing(name: &str) -> Result<Arc<dyn Executor>> {
    Ok(Arc::new(LaneExecutor::new(name)?))
}

/// Creates a queue bound to `executor`.
#[must_use]
pub fn async_queue_for(executor: Arc<dyn Executor>) -> AsyncQueue {
    AsyncQueue::with_executor(executor)
}

/// Creates a queue on a fresh thread-backed `"worker"` lane.
///
/// # Errors
///
/// Returns [`Error::Spawn`](crate::Error::Spawn) if the lane thread could not
/// be started.
pub fn async_queue_for_testing() -> Result<AsyncQueue> {
    executor_for_testing("worker").map(async_queue_for)
}

/// Creates a queue on a manually stepped `"worker"` lane with virtual time.
///
/// The returned [`TestExecutor`] controls the queue: nothing runs until it
/// is stepped, and delayed operations fire as its clock advances.
#[must_use]
pub fn virtual_queue_for_testing() -> (AsyncQueue, TestExecutor) {
    let executor = TestExecutor::named("worker");
    (AsyncQueue::new(executor.clone()), executor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TimerId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_roles_are_labels_only() {
        let user = executor_for_testing("user").unwrap();
        let worker = executor_for_testing("worker").unwrap();

        assert_eq!(user.name(), "user");
        assert_eq!(worker.name(), "worker");
        assert_ne!(user.lane_id(), worker.lane_id());
    }

    #[test]
    fn test_thread_backed_queue_runs_work() {
        let queue = async_queue_for_testing().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            queue
                .enqueue(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.drain(false);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_virtual_queue_waits_for_virtual_time() {
        let (queue, executor) = virtual_queue_for_testing();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        queue
            .schedule_delayed(Duration::from_secs(30), TimerId::OnlineStateTimeout, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        executor.advance_by(Duration::from_secs(29));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        executor.advance_by(Duration::from_secs(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
