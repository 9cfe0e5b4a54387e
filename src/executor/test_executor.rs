//! The `TestExecutor` implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::completion::completion_pair;
use super::task::{LaneId, Task, TaskId, TaskInfo, TaskState, TimerToken};
use super::timer::TimerQueue;
use super::Executor;
use crate::clock::MockClock;
use crate::config::ShutdownPolicy;
use crate::error::{Error, Result};

/// An executor whose lane only runs when the test tells it to.
///
/// Submitted tasks are queued in FIFO order but nothing executes until you
/// call [`step`], [`run_until_stalled`] or one of the time-advancing
/// methods. Timers are measured against a [`MockClock`], so delayed work
/// fires as soon as virtual time passes its deadline, without sleeping.
///
/// While a task runs, the thread that is stepping the executor is its lane.
///
/// # Example
///
/// ```rust
/// use lane_queue::executor::{Executor, Task, TestExecutor};
/// use std::time::Duration;
///
/// let executor = TestExecutor::new();
///
/// executor.execute(Task::new(|| println!("now"))).unwrap();
/// executor
///     .schedule(Duration::from_millis(100), Task::new(|| println!("later")))
///     .unwrap();
///
/// // Nothing has run yet
/// assert_eq!(executor.ready_count(), 1);
///
/// assert_eq!(executor.run_until_stalled(), 1);
/// assert_eq!(executor.advance_by(Duration::from_millis(100)), 1);
/// ```
///
/// [`step`]: TestExecutor::step
/// [`run_until_stalled`]: TestExecutor::run_until_stalled
#[derive(Clone)]
pub struct TestExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    name: String,
    lane_id: LaneId,
    clock: MockClock,
    /// Tasks ready to run, in submission order.
    ready_queue: Mutex<VecDeque<Task>>,
    /// Tasks waiting for their virtual deadline.
    timers: Mutex<TimerQueue>,
    /// Information about all tasks (for inspection).
    task_info: Mutex<Vec<TaskInfo>>,
    /// The thread currently running a task, if any.
    running_on: Mutex<Option<ThreadId>>,
    /// Serializes steppers so only one thread acts as the lane at a time.
    step_lock: Mutex<()>,
    shut_down: Mutex<bool>,
}

impl TestExecutor {
    /// Creates a test executor named `"test"` with a fresh clock.
    #[must_use]
    pub fn new() -> Self {
        Self::named("test")
    }

    /// Creates a test executor with the given diagnostic name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_clock(name, MockClock::new())
    }

    /// Creates a test executor reading virtual time from `clock`.
    ///
    /// Sharing one clock between several executors advances them together.
    #[must_use]
    pub fn with_clock(name: impl Into<String>, clock: MockClock) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                name: name.into(),
                lane_id: LaneId::new(),
                clock,
                ready_queue: Mutex::new(VecDeque::new()),
                timers: Mutex::new(TimerQueue::new()),
                task_info: Mutex::new(Vec::new()),
                running_on: Mutex::new(None),
                step_lock: Mutex::new(()),
                shut_down: Mutex::new(false),
            }),
        }
    }

    /// The virtual clock driving this executor's timers.
    #[must_use]
    pub fn clock(&self) -> &MockClock {
        &self.inner.clock
    }

    /// Returns the number of tasks ready to run (timers not yet due excluded).
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner.ready_queue.lock().len()
    }

    /// Returns true if nothing is queued and no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready_count() == 0 && self.timer_count() == 0
    }

    /// Gets information about a task by its ID.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<TaskInfo> {
        self.inner
            .task_info
            .lock()
            .iter()
            .find(|info| info.id == id)
            .cloned()
    }

    /// Returns information about all tasks, in submission order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.inner.task_info.lock().clone()
    }

    /// Finds a task by name.
    #[must_use]
    pub fn task_by_name(&self, name: &str) -> Option<TaskInfo> {
        self.inner
            .task_info
            .lock()
            .iter()
            .find(|t| t.name.as_deref() == Some(name))
            .cloned()
    }

    /// Returns the number of tasks that ran to completion.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.count_in(TaskState::Completed)
    }

    /// Returns the number of tasks that panicked.
    #[must_use]
    pub fn panicked_count(&self) -> usize {
        self.count_in(TaskState::Panicked)
    }

    /// Runs one task: the earliest due timer if any, otherwise the oldest
    /// ready task.
    ///
    /// Returns `true` if a task ran, `false` if there was nothing to run.
    ///
    /// # Panics
    ///
    /// Panics if called from a task running on this executor.
    pub fn step(&self) -> bool {
        assert!(
            !self.is_current_lane(),
            "step called from a task running on the '{}' lane",
            self.inner.name
        );
        let _stepping = self.inner.step_lock.lock();

        let Some(task) = self.next_task() else {
            return false;
        };
        let id = task.id();
        self.set_state(id, TaskState::Running);

        *self.inner.running_on.lock() = Some(std::thread::current().id());
        let completed = task.run_contained(&self.inner.name);
        *self.inner.running_on.lock() = None;

        let state = if completed {
            TaskState::Completed
        } else {
            TaskState::Panicked
        };
        self.set_state(id, state);
        true
    }

    /// Runs tasks until nothing is ready, including tasks submitted by the
    /// tasks that ran. Timers that are not yet due stay pending.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_stalled(&self) -> usize {
        let mut count = 0;
        while self.step() {
            count += 1;
        }
        count
    }

    /// Runs at most `max_steps` tasks, returning how many ran.
    pub fn run_steps(&self, max_steps: usize) -> usize {
        let mut count = 0;
        while count < max_steps && self.step() {
            count += 1;
        }
        count
    }

    /// Advances virtual time by `duration` and runs everything that became
    /// ready, in deadline order.
    ///
    /// Timers are released one deadline at a time, so work scheduled by an
    /// earlier timer for a point inside the window still fires in order.
    ///
    /// Returns the number of tasks run.
    pub fn advance_by(&self, duration: Duration) -> usize {
        let target = self.inner.clock.now().saturating_add(duration);
        self.advance_to(target)
    }

    /// Advances virtual time to `target` (never backwards) and runs
    /// everything that became ready.
    ///
    /// Returns the number of tasks run.
    pub fn advance_to(&self, target: Duration) -> usize {
        let mut count = self.run_until_stalled();
        while let Some(deadline) = self.next_deadline() {
            if deadline > target {
                break;
            }
            self.inner.clock.advance_to(deadline);
            count += self.run_until_stalled();
        }
        self.inner.clock.advance_to(target);
        count + self.run_until_stalled()
    }

    /// Jumps virtual time to the earliest pending timer and runs what became
    /// ready.
    ///
    /// Returns `false` if no timer was pending.
    pub fn advance_to_next_timer(&self) -> bool {
        match self.next_deadline() {
            Some(deadline) => {
                self.advance_to(deadline);
                true
            }
            None => false,
        }
    }

    /// Advances virtual time until every timer has fired, including timers
    /// scheduled along the way.
    ///
    /// Returns the number of tasks run.
    pub fn run_all_timers(&self) -> usize {
        let mut count = self.run_until_stalled();
        while let Some(deadline) = self.next_deadline() {
            count += self.advance_to(deadline);
        }
        count
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.inner.timers.lock().next_deadline()
    }

    fn next_task(&self) -> Option<Task> {
        let now = self.inner.clock.now();
        if let Some(task) = self.inner.timers.lock().pop_due(now) {
            return Some(task);
        }
        self.inner.ready_queue.lock().pop_front()
    }

    fn accept(&self) -> Result<()> {
        if *self.inner.shut_down.lock() {
            warn!(lane = %self.inner.name, "submission rejected: lane is shut down");
            return Err(Error::shut_down(&self.inner.name));
        }
        Ok(())
    }

    fn record(&self, task: &Task) {
        self.inner.task_info.lock().push(task.info());
    }

    fn count_in(&self, state: TaskState) -> usize {
        self.inner
            .task_info
            .lock()
            .iter()
            .filter(|t| t.state == state)
            .count()
    }

    fn set_state(&self, id: TaskId, state: TaskState) {
        let mut infos = self.inner.task_info.lock();
        if let Some(info) = infos.iter_mut().rev().find(|i| i.id == id) {
            info.state = state;
        }
    }
}

impl Executor for TestExecutor {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn lane_id(&self) -> LaneId {
        self.inner.lane_id
    }

    fn is_current_lane(&self) -> bool {
        *self.inner.running_on.lock() == Some(std::thread::current().id())
    }

    fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    fn execute(&self, task: Task) -> Result<()> {
        self.accept()?;
        self.record(&task);
        self.inner.ready_queue.lock().push_back(task);
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
        while !completion.is_complete() && self.step() {}
        // A task discarded by shutdown drops its completer, which settles
        // the slot to `Dropped`.
        completion.try_take().unwrap_or(Err(Error::Dropped))
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<TimerToken> {
        self.accept()?;
        self.record(&task);
        let deadline = self.inner.clock.now().saturating_add(delay);
        Ok(self.inner.timers.lock().push(deadline, task))
    }

    fn try_cancel(&self, token: TimerToken) -> bool {
        let removed = self.inner.timers.lock().remove(token);
        if removed.is_some() {
            self.set_state(token.task_id(), TaskState::Cancelled);
        }
        removed.is_some()
    }

    fn is_scheduled(&self, token: TimerToken) -> bool {
        self.inner.timers.lock().contains(token)
    }

    /// Runs every ready task on the calling thread.
    fn flush(&self) {
        self.run_until_stalled();
    }

    fn queued_count(&self) -> usize {
        self.ready_count()
    }

    fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    fn shutdown(&self, policy: ShutdownPolicy) {
        {
            let mut shut_down = self.inner.shut_down.lock();
            if *shut_down {
                return;
            }
            *shut_down = true;
        }
        let mut discarded = self.inner.timers.lock().take_all();
        if policy == ShutdownPolicy::Discard {
            discarded.extend(self.inner.ready_queue.lock().drain(..));
        }
        debug!(
            lane = %self.inner.name,
            %policy,
            discarded = discarded.len(),
            "lane shutting down"
        );
        for task in discarded {
            self.set_state(task.id(), TaskState::Cancelled);
        }
        if policy == ShutdownPolicy::Drain && !self.is_current_lane() {
            self.run_until_stalled();
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shut_down.lock()
    }
}

impl Default for TestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestExecutor")
            .field("name", &self.inner.name)
            .field("now", &self.inner.clock.now())
            .field("ready", &self.ready_count())
            .field("timers", &self.timer_count())
            .finish()
    }
}
