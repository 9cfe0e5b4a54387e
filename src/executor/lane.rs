//! The production executor: one dedicated thread per lane.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::completion::completion_pair;
use super::task::{LaneId, Task, TimerToken};
use super::timer::TimerQueue;
use super::Executor;
use crate::clock::TimeSource;
use crate::config::{LaneConfig, ShutdownPolicy};
use crate::error::{Error, Result};

/// Longest the lane parks before re-reading a non-realtime clock while a
/// timer is pending.
const MAX_TIMER_PARK: Duration = Duration::from_millis(50);

struct LaneState {
    intake: VecDeque<Task>,
    timers: TimerQueue,
    running: bool,
    shut_down: bool,
}

struct LaneInner {
    name: String,
    lane_id: LaneId,
    clock: Arc<dyn TimeSource>,
    state: Mutex<LaneState>,
    work_ready: Condvar,
    idle: Condvar,
    thread_id: OnceLock<ThreadId>,
}

impl LaneInner {
    fn on_lane(&self) -> bool {
        self.thread_id.get() == Some(&std::thread::current().id())
    }
}

/// An [`Executor`] backed by a single named OS thread.
///
/// Tasks run one at a time, in submission order, on the lane thread. A task
/// that panics is logged and the lane moves on to the next one.
///
/// # Example
///
/// ```rust
/// use lane_queue::executor::{Executor, LaneExecutor, Task};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let lane = LaneExecutor::new("worker").unwrap();
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..3 {
///     let counter = Arc::clone(&counter);
///     lane.execute(Task::new(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }))
///     .unwrap();
/// }
///
/// lane.flush();
/// assert_eq!(counter.load(Ordering::SeqCst), 3);
/// ```
pub struct LaneExecutor {
    inner: Arc<LaneInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drop_policy: ShutdownPolicy,
}

impl LaneExecutor {
    /// Starts a lane with the given diagnostic name and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the lane thread cannot be started.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(LaneConfig::new(name))
    }

    /// Starts a lane from a [`LaneConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the lane thread cannot be started.
    pub fn with_config(config: LaneConfig) -> Result<Self> {
        let inner = Arc::new(LaneInner {
            name: config.name,
            lane_id: LaneId::new(),
            clock: config.clock,
            state: Mutex::new(LaneState {
                intake: VecDeque::new(),
                timers: TimerQueue::new(),
                running: false,
                shut_down: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            thread_id: OnceLock::new(),
        });

        let lane = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(format!("lane-{}", inner.name))
            .spawn(move || lane_loop(&lane))?;
        debug!(lane = %inner.name, id = %inner.lane_id, "lane started");

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
            drop_policy: config.shutdown_policy,
        })
    }

    fn reject(&self) -> Error {
        warn!(lane = %self.inner.name, "submission rejected: lane is shut down");
        Error::shut_down(&self.inner.name)
    }
}

impl Executor for LaneExecutor {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn lane_id(&self) -> LaneId {
        self.inner.lane_id
    }

    fn is_current_lane(&self) -> bool {
        self.inner.on_lane()
    }

    fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    fn execute(&self, task: Task) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                drop(state);
                return Err(self.reject());
            }
            state.intake.push_back(task);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    fn execute_blocking(&self, task: Task) -> Result<()> {
        assert!(
            !self.is_current_lane(),
            "execute_blocking called from the '{}' lane itself",
            self.inner.name
        );
        let (completer, completion) = completion_pair();
        self.execute(task.wrap(move |task| {
            task.run();
            completer.complete(());
        }))?;
        completion.wait()
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<TimerToken> {
        let token = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                drop(state);
                return Err(self.reject());
            }
            let deadline = self.inner.clock.deadline_after(delay);
            state.timers.push(deadline, task)
        };
        // The new timer may be earlier than the one the lane is parked on.
        self.inner.work_ready.notify_one();
        Ok(token)
    }

    fn try_cancel(&self, token: TimerToken) -> bool {
        let removed = self.inner.state.lock().timers.remove(token);
        removed.is_some()
    }

    fn is_scheduled(&self, token: TimerToken) -> bool {
        self.inner.state.lock().timers.contains(token)
    }

    fn flush(&self) {
        assert!(
            !self.is_current_lane(),
            "flush called from the '{}' lane itself",
            self.inner.name
        );
        let mut state = self.inner.state.lock();
        while !state.intake.is_empty() || state.running {
            self.inner.idle.wait(&mut state);
        }
    }

    fn queued_count(&self) -> usize {
        self.inner.state.lock().intake.len()
    }

    fn timer_count(&self) -> usize {
        self.inner.state.lock().timers.len()
    }

    fn shutdown(&self, policy: ShutdownPolicy) {
        let discarded = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                Vec::new()
            } else {
                state.shut_down = true;
                let mut discarded = state.timers.take_all();
                if policy == ShutdownPolicy::Discard {
                    discarded.extend(state.intake.drain(..));
                }
                discarded
            }
        };
        self.inner.work_ready.notify_all();
        debug!(
            lane = %self.inner.name,
            %policy,
            discarded = discarded.len(),
            "lane shutting down"
        );
        // Dropped outside the lock: dropping a task may resolve completions.
        drop(discarded);

        if self.is_current_lane() {
            // The lane exits once the current task returns.
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }
}

impl Drop for LaneExecutor {
    fn drop(&mut self) {
        self.shutdown(self.drop_policy);
    }
}

impl fmt::Debug for LaneExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LaneExecutor")
            .field("name", &self.inner.name)
            .field("queued", &state.intake.len())
            .field("timers", &state.timers.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

fn lane_loop(inner: &LaneInner) {
    let _ = inner.thread_id.set(std::thread::current().id());

    loop {
        let task = {
            let mut state = inner.state.lock();
            state.running = false;
            loop {
                let now = inner.clock.now();
                // Due timers go before immediate work.
                if let Some(task) = state
                    .timers
                    .pop_due(now)
                    .or_else(|| state.intake.pop_front())
                {
                    state.running = true;
                    break task;
                }
                inner.idle.notify_all();
                if state.shut_down {
                    debug!(lane = %inner.name, "lane stopped");
                    return;
                }
                match state.timers.next_deadline() {
                    Some(deadline) => {
                        let mut park = deadline.saturating_sub(now);
                        if !inner.clock.is_realtime() {
                            park = park.min(MAX_TIMER_PARK);
                        }
                        inner.work_ready.wait_for(&mut state, park);
                    }
                    None => inner.work_ready.wait(&mut state),
                }
            }
        };
        task.run_contained(&inner.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_runs_in_submission_order() {
        let lane = LaneExecutor::new("order").unwrap();
        let order = recorder();

        for label in ["a", "b", "c", "d"] {
            let order = Arc::clone(&order);
            lane.execute(Task::new(move || order.lock().push(label)))
                .unwrap();
        }
        lane.flush();

        assert_eq!(*order.lock(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_is_current_lane() {
        let lane = Arc::new(LaneExecutor::new("identity").unwrap());
        assert!(!lane.is_current_lane());

        let seen = Arc::new(AtomicBool::new(false));
        let (probe, flag) = (Arc::clone(&lane), Arc::clone(&seen));
        lane.execute(Task::new(move || {
            flag.store(probe.is_current_lane(), Ordering::SeqCst);
        }))
        .unwrap();
        lane.flush();

        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn test_submission_from_lane_is_queued_not_inlined() {
        let lane = Arc::new(LaneExecutor::new("reentrant").unwrap());
        let order = recorder();

        let (inner_lane, outer_order) = (Arc::clone(&lane), Arc::clone(&order));
        lane.execute(Task::new(move || {
            let nested_order = Arc::clone(&outer_order);
            inner_lane
                .execute(Task::new(move || nested_order.lock().push("nested")))
                .unwrap();
            outer_order.lock().push("outer");
        }))
        .unwrap();
        lane.flush();

        assert_eq!(*order.lock(), ["outer", "nested"]);
    }

    #[test]
    fn test_panicking_task_does_not_kill_lane() {
        let lane = LaneExecutor::new("panics").unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        lane.execute(Task::new(|| panic!("task failure"))).unwrap();
        let flag = Arc::clone(&ran);
        lane.execute(Task::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        lane.flush();

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let lane = LaneExecutor::new("timers").unwrap();
        let order = recorder();

        let slow = Arc::clone(&order);
        lane.schedule(
            Duration::from_millis(60),
            Task::new(move || slow.lock().push("slow")),
        )
        .unwrap();
        let fast = Arc::clone(&order);
        lane.schedule(
            Duration::from_millis(10),
            Task::new(move || fast.lock().push("fast")),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), ["fast", "slow"]);
        assert_eq!(lane.timer_count(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_runs() {
        let lane = LaneExecutor::new("cancel").unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        let token = lane
            .schedule(
                Duration::from_millis(20),
                Task::new(move || flag.store(true, Ordering::SeqCst)),
            )
            .unwrap();
        assert!(lane.is_scheduled(token));
        assert!(lane.try_cancel(token));
        assert!(!lane.try_cancel(token));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_execute_blocking_waits_for_task() {
        let lane = LaneExecutor::new("blocking").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        lane.execute_blocking(Task::new(move || {
            std::thread::sleep(Duration::from_millis(10));
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_blocking_on_lane_panics_instead_of_deadlocking() {
        let lane = Arc::new(LaneExecutor::new("self-block").unwrap());
        let detected = Arc::new(AtomicBool::new(false));

        let (probe, flag) = (Arc::clone(&lane), Arc::clone(&detected));
        lane.execute(Task::new(move || {
            let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = probe.execute_blocking(Task::new(|| {}));
            }));
            flag.store(attempt.is_err(), Ordering::SeqCst);
        }))
        .unwrap();
        lane.flush();

        assert!(detected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let lane = LaneExecutor::new("closed").unwrap();
        lane.shutdown(ShutdownPolicy::Drain);

        assert!(lane.is_shut_down());
        let err = lane.execute(Task::new(|| {})).unwrap_err();
        assert!(err.is_shut_down());
        assert!(lane.schedule(Duration::ZERO, Task::new(|| {})).is_err());
    }

    #[test]
    fn test_shutdown_drain_runs_queued_work() {
        let lane = LaneExecutor::new("drain").unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        let b = Arc::clone(&barrier);
        lane.execute(Task::new(move || {
            b.wait();
        }))
        .unwrap();
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            lane.execute(Task::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        barrier.wait();
        lane.shutdown(ShutdownPolicy::Drain);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_shutdown_discard_drops_queued_work() {
        let lane = LaneExecutor::new("discard").unwrap();
        let gate = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        let (g, r) = (Arc::clone(&gate), Arc::clone(&release));
        lane.execute(Task::new(move || {
            g.wait();
            r.wait();
        }))
        .unwrap();
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            lane.execute(Task::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        // The lane is parked inside the first task while we discard.
        gate.wait();
        let releaser = {
            let r = Arc::clone(&release);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                r.wait();
            })
        };
        lane.shutdown(ShutdownPolicy::Discard);
        releaser.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execute_blocking_reports_discarded_task() {
        let lane = Arc::new(LaneExecutor::new("discard-blocking").unwrap());

        let shutter = Arc::clone(&lane);
        lane.execute(Task::new(move || {
            // Hold the lane until the blocking task is queued behind us.
            while shutter.queued_count() == 0 {
                std::thread::yield_now();
            }
            shutter.shutdown(ShutdownPolicy::Discard);
        }))
        .unwrap();

        let outcome = lane.execute_blocking(Task::new(|| panic!("discarded task ran")));
        assert!(matches!(outcome, Err(Error::Dropped)));
    }

    #[test]
    fn test_execute_blocking_reports_panic() {
        let lane = LaneExecutor::new("blocking-panic").unwrap();

        let outcome = lane.execute_blocking(Task::new(|| panic!("task failure")));
        assert!(matches!(outcome, Err(Error::Panicked)));

        // The lane survived the panic.
        lane.execute_blocking(Task::new(|| {})).unwrap();
    }

    #[test]
    fn test_timer_follows_a_mock_clock() {
        let clock = MockClock::new();
        let config = LaneConfig::new("mock-timed").clock(Arc::new(clock.clone()));
        let lane = LaneExecutor::with_config(config).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        lane.schedule(
            Duration::from_secs(3600),
            Task::new(move || tx.send(()).unwrap()),
        )
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        clock.advance(Duration::from_secs(3600));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(lane.timer_count(), 0);
    }

    #[test]
    fn test_thread_is_named_after_lane() {
        let lane = LaneExecutor::new("named").unwrap();
        let name = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&name);
        lane.execute(Task::new(move || {
            *slot.lock() = std::thread::current().name().map(str::to_string);
        }))
        .unwrap();
        lane.flush();

        assert_eq!(name.lock().as_deref(), Some("lane-named"));
    }
}
