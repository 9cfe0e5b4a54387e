//! The `AsyncQueue` implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::delayed::{DelayedKey, DelayedOperation, DelayedSet, PendingOp};
use super::timer_id::TimerId;
use crate::config::ShutdownPolicy;
use crate::error::{Error, Result};
use crate::executor::{completion_pair, Completion, Executor, Task, TimerToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueMode {
    Open,
    /// Only cleanup work submitted with `enqueue_even_while_restricted`.
    Restricted,
    ShutDown,
}

pub(crate) struct QueueInner {
    executor: Arc<dyn Executor>,
    delayed: Mutex<DelayedSet>,
    mode: Mutex<QueueMode>,
}

impl QueueInner {
    fn name(&self) -> &str {
        self.executor.name()
    }

    fn admit(&self, even_while_restricted: bool) -> Result<()> {
        let mode = *self.mode.lock();
        match mode {
            QueueMode::Open => Ok(()),
            QueueMode::Restricted if even_while_restricted => Ok(()),
            QueueMode::Restricted => {
                warn!(queue = %self.name(), "submission rejected: queue is restricted");
                Err(Error::restricted(self.name()))
            }
            QueueMode::ShutDown => {
                warn!(queue = %self.name(), "submission rejected: queue is shut down");
                Err(Error::shut_down(self.name()))
            }
        }
    }

    /// Fires every delayed operation that is due, earliest first.
    fn fire_due(&self) {
        loop {
            let now = self.executor.now();
            let Some(op) = self.delayed.lock().pop_due(now) else {
                break;
            };
            self.run_op(op);
        }
    }

    /// Fires delayed operations in order, ignoring deadlines, up to and
    /// including the first one of kind `last` (`TimerId::All`: all of them).
    fn fire_until(&self, last: TimerId) {
        loop {
            let Some(op) = self.delayed.lock().pop_first() else {
                break;
            };
            let reached = last != TimerId::All && op.timer_id == last;
            self.run_op(op);
            if reached {
                break;
            }
        }
    }

    fn run_op(&self, op: PendingOp) {
        self.executor.try_cancel(op.token);
        trace!(
            queue = %self.name(),
            timer = %op.timer_id,
            task = %op.task.id(),
            "delayed operation fired"
        );
        op.task.run_contained(self.name());
    }

    pub(crate) fn cancel_delayed(&self, key: &DelayedKey) -> bool {
        let cancelled = self.delayed.lock().cancel(key);
        match cancelled {
            Some(op) => {
                self.executor.try_cancel(op.token);
                trace!(
                    queue = %self.name(),
                    timer = %op.timer_id,
                    task = %op.task.id(),
                    "delayed operation cancelled"
                );
                true
            }
            None => false,
        }
    }

    fn cancel_matching(&self, filter: TimerId) -> usize {
        let cancelled = self.delayed.lock().cancel_matching(filter);
        for op in &cancelled {
            self.executor.try_cancel(op.token);
        }
        cancelled.len()
    }
}

/// The serialized queue that all confined state is touched from.
///
/// Every submission runs on the wrapped [`Executor`]'s single lane, so work
/// on the queue never races with other work on the queue. Immediate tasks
/// run in submission order. Delayed operations run in deadline order, ties
/// in submission order, and can be cancelled until they fire.
///
/// Before each immediate task runs, every delayed operation whose deadline
/// has passed is fired first, so a due timer is never overtaken by work
/// submitted after its deadline.
///
/// Cloning an `AsyncQueue` yields another handle to the same queue.
///
/// # Example
///
/// ```rust
/// use lane_queue::queue::{AsyncQueue, TimerId};
/// use lane_queue::executor::TestExecutor;
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// let executor = TestExecutor::named("worker");
/// let queue = AsyncQueue::new(executor.clone());
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let l = Arc::clone(&log);
/// queue
///     .schedule_delayed(Duration::from_millis(10), TimerId::Heartbeat, move || {
///         l.lock().unwrap().push("heartbeat")
///     })
///     .unwrap();
/// let l = Arc::clone(&log);
/// queue.enqueue(move || l.lock().unwrap().push("write")).unwrap();
///
/// queue.drain(true);
/// assert_eq!(*log.lock().unwrap(), ["write", "heartbeat"]);
/// ```
#[derive(Clone)]
pub struct AsyncQueue {
    inner: Arc<QueueInner>,
}

impl AsyncQueue {
    /// Creates a queue bound to `executor`.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self::with_executor(Arc::new(executor))
    }

    /// Creates a queue bound to an executor that is shared elsewhere.
    #[must_use]
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                executor,
                delayed: Mutex::new(DelayedSet::default()),
                mode: Mutex::new(QueueMode::Open),
            }),
        }
    }

    /// Diagnostic name of the underlying lane.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The executor this queue runs on.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    /// Returns true if the caller is running on this queue's lane.
    #[must_use]
    pub fn is_current_queue(&self) -> bool {
        self.inner.executor.is_current_lane()
    }

    /// Asserts that the caller is running on this queue's lane.
    ///
    /// # Panics
    ///
    /// Panics when called from any other context: queue-confined state was
    /// about to be touched from outside the queue.
    pub fn verify_is_current_queue(&self) {
        assert!(
            self.is_current_queue(),
            "expected to be running on the '{}' queue ({}), but was called from another context",
            self.name(),
            self.inner.executor.lane_id()
        );
    }

    /// Submits `work` to run on the queue and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Restricted`] in restricted mode and
    /// [`Error::ShutDown`] after shutdown.
    pub fn enqueue<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(work), false)
    }

    /// Like [`enqueue`](AsyncQueue::enqueue), with a diagnostic task name.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](AsyncQueue::enqueue).
    pub fn enqueue_named<F>(&self, name: &str, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::named(name, work), false)
    }

    /// Submits cleanup work that is accepted even in restricted mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`] after shutdown.
    pub fn enqueue_even_while_restricted<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(work), true)
    }

    /// Submits `work` and returns a [`Completion`] for its result.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](AsyncQueue::enqueue).
    pub fn enqueue_with_result<F, T>(&self, work: F) -> Result<Completion<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (completer, completion) = completion_pair();
        self.enqueue(move || completer.complete(work()))?;
        Ok(completion.bound_to(&self.inner.executor))
    }

    /// Submits `work` and blocks the caller until it has run.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](AsyncQueue::enqueue), plus [`Error::Dropped`] if
    /// the work was discarded by a shutdown before it ran.
    ///
    /// # Panics
    ///
    /// Panics when called from the queue's own lane, which would otherwise
    /// wait on itself forever.
    pub fn enqueue_and_wait<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            !self.is_current_queue(),
            "enqueue_and_wait called from the '{}' queue's own lane",
            self.name()
        );
        self.inner.admit(false)?;
        let task = self.wrap_immediate(Task::new(work));
        self.inner.executor.execute_blocking(task)
    }

    /// Schedules `work` to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](AsyncQueue::enqueue).
    ///
    /// # Panics
    ///
    /// Panics if `timer_id` is [`TimerId::All`], which only works as a filter.
    pub fn schedule_delayed<F>(
        &self,
        delay: Duration,
        timer_id: TimerId,
        work: F,
    ) -> Result<DelayedOperation>
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            timer_id != TimerId::All,
            "TimerId::All cannot be used to schedule a delayed operation"
        );
        self.inner.admit(false)?;

        let task = Task::named(timer_id.as_str(), work);
        let key = (self.inner.executor.now().saturating_add(delay), task.id());

        let queue = Arc::downgrade(&self.inner);
        let tick = Task::named(format!("timer:{timer_id}"), move || {
            if let Some(inner) = queue.upgrade() {
                inner.fire_due();
            }
        });
        let token = TimerToken(tick.id());

        let state = self.inner.delayed.lock().insert(key, timer_id, task, token);
        if let Err(err) = self.inner.executor.schedule(delay, tick) {
            let never_armed = self.inner.delayed.lock().cancel(&key);
            drop(never_armed);
            return Err(err);
        }
        trace!(
            queue = %self.name(),
            timer = %timer_id,
            task = %key.1,
            ?delay,
            "delayed operation scheduled"
        );

        Ok(DelayedOperation::new(
            key,
            timer_id,
            state,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Cancels `op` if it has not fired. Returns true if this call cancelled it.
    pub fn cancel(&self, op: &DelayedOperation) -> bool {
        op.cancel()
    }

    /// Cancels every pending delayed operation of kind `timer_id`
    /// (`TimerId::All`: every kind). Returns how many were cancelled.
    pub fn cancel_all_delayed(&self, timer_id: TimerId) -> usize {
        let cancelled = self.inner.cancel_matching(timer_id);
        if cancelled > 0 {
            debug!(queue = %self.name(), timer = %timer_id, cancelled, "delayed operations cancelled");
        }
        cancelled
    }

    /// Returns true if a delayed operation of kind `timer_id` is pending.
    #[must_use]
    pub fn is_scheduled(&self, timer_id: TimerId) -> bool {
        self.inner.delayed.lock().contains_kind(timer_id)
    }

    /// Number of pending delayed operations.
    #[must_use]
    pub fn delayed_count(&self) -> usize {
        self.inner.delayed.lock().len()
    }

    /// Fires pending delayed operations in order, ignoring their deadlines,
    /// up to and including the first one of kind `last`. `TimerId::All`
    /// fires all of them. Blocks until done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`] if the executor is shut down.
    ///
    /// # Panics
    ///
    /// Panics if no operation of kind `last` is pending, or when called from
    /// the queue's own lane.
    pub fn run_delayed_until(&self, last: TimerId) -> Result<()> {
        assert!(
            last == TimerId::All || self.is_scheduled(last),
            "run_delayed_until: no delayed operation of kind '{last}' is scheduled"
        );
        let queue = Arc::downgrade(&self.inner);
        self.inner
            .executor
            .execute_blocking(Task::named("run-delayed-until", move || {
                if let Some(inner) = queue.upgrade() {
                    inner.fire_until(last);
                }
            }))
    }

    /// Runs all queued work to completion before returning. With
    /// `include_delayed`, every pending delayed operation is also fired
    /// right away, in order, after the immediate work.
    ///
    /// Work submitted by the drained work is drained too; a timer that keeps
    /// rescheduling itself keeps a delayed drain from returning.
    ///
    /// # Panics
    ///
    /// Panics when called from the queue's own lane.
    pub fn drain(&self, include_delayed: bool) {
        assert!(
            !self.is_current_queue(),
            "drain called from the '{}' queue's own lane",
            self.name()
        );
        let executor = &self.inner.executor;
        loop {
            if include_delayed && !self.inner.delayed.lock().is_empty() {
                let queue = Arc::downgrade(&self.inner);
                let fire_all = Task::named("drain-delayed", move || {
                    if let Some(inner) = queue.upgrade() {
                        inner.fire_until(TimerId::All);
                    }
                });
                if executor.execute(fire_all).is_err() {
                    // Nothing can run them any more.
                    self.inner.cancel_matching(TimerId::All);
                }
            }
            executor.flush();

            let delayed_left = include_delayed && !self.inner.delayed.lock().is_empty();
            if !delayed_left && (executor.queued_count() == 0 || executor.is_shut_down()) {
                break;
            }
        }
    }

    /// Refuses ordinary submissions from now on. Work submitted with
    /// [`enqueue_even_while_restricted`] is still accepted.
    ///
    /// [`enqueue_even_while_restricted`]: AsyncQueue::enqueue_even_while_restricted
    pub fn enter_restricted_mode(&self) {
        let mut mode = self.inner.mode.lock();
        if *mode == QueueMode::Open {
            *mode = QueueMode::Restricted;
            debug!(queue = %self.name(), "queue entered restricted mode");
        }
    }

    /// Returns true once the queue is restricted or shut down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.mode.lock() != QueueMode::Open
    }

    /// Shuts the queue down: pending delayed operations are cancelled, the
    /// executor stops accepting work and handles already-queued work per
    /// `policy`. Later submissions fail with [`Error::ShutDown`]. Idempotent.
    pub fn shutdown(&self, policy: ShutdownPolicy) {
        {
            let mut mode = self.inner.mode.lock();
            if *mode == QueueMode::ShutDown {
                return;
            }
            *mode = QueueMode::ShutDown;
        }
        let cancelled = self.inner.cancel_matching(TimerId::All);
        debug!(queue = %self.name(), %policy, cancelled, "queue shutting down");
        self.inner.executor.shutdown(policy);
    }

    /// Returns true once [`shutdown`](AsyncQueue::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.inner.mode.lock() == QueueMode::ShutDown
    }

    fn submit(&self, task: Task, even_while_restricted: bool) -> Result<()> {
        self.inner.admit(even_while_restricted)?;
        let task = self.wrap_immediate(task);
        self.inner.executor.execute(task)
    }

    /// Makes an immediate task fire due delayed operations before it runs.
    fn wrap_immediate(&self, task: Task) -> Task {
        let queue = Arc::downgrade(&self.inner);
        task.wrap(move |task| {
            if let Some(inner) = queue.upgrade() {
                inner.fire_due();
            }
            task.run();
        })
    }
}

impl fmt::Debug for AsyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("executor", &self.inner.executor)
            .field("mode", &*self.inner.mode.lock())
            .field("delayed", &self.delayed_count())
            .finish()
    }
}
