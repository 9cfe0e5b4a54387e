//! Task types shared by every executor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, monotonically increasing identifier for a submitted task.
///
/// Ids are handed out in submission order, so they double as the FIFO
/// tie-breaker for tasks sharing a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a new unique task ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Identity token of an execution lane.
///
/// Compared against the lane an executor is currently running on to check
/// queue confinement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LaneId(u64);

impl LaneId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lane({})", self.0)
    }
}

/// Handle to a raw executor timer, used to cancel it before it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(pub(crate) TaskId);

impl TimerToken {
    /// The id of the task the timer will run.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.0
    }
}

/// The lifecycle state of a task inside a [`TestExecutor`].
///
/// [`TestExecutor`]: crate::executor::TestExecutor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted, not yet run. Timers stay here until their deadline.
    Pending,
    /// Currently running on the lane.
    Running,
    /// Ran to completion.
    Completed,
    /// Panicked while running; the lane carried on.
    Panicked,
    /// Removed before it ran (cancelled timer or discarded at shutdown).
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Completed => write!(f, "Completed"),
            TaskState::Panicked => write!(f, "Panicked"),
            TaskState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Information about a task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    /// The task's unique identifier.
    pub id: TaskId,
    /// Current state of the task.
    pub state: TaskState,
    /// Optional name for debugging.
    pub name: Option<String>,
}

impl TaskInfo {
    pub(crate) fn new(id: TaskId, name: Option<String>) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            name,
        }
    }
}

type Work = Box<dyn FnOnce() + Send + 'static>;

/// An opaque unit of work: a closure plus its submission index.
///
/// Executors only ever see `Task`s, so they stay agnostic to what the work
/// does.
///
/// # Example
///
/// ```rust
/// use lane_queue::executor::Task;
///
/// let first = Task::new(|| {});
/// let second = Task::named("flush-writes", || {});
/// assert!(first.id() < second.id());
/// assert_eq!(second.name(), Some("flush-writes"));
/// ```
pub struct Task {
    id: TaskId,
    name: Option<String>,
    work: Work,
}

impl Task {
    /// Wraps a closure as a task.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            name: None,
            work: Box::new(work),
        }
    }

    /// Wraps a closure as a task with a diagnostic name.
    pub fn named<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: Some(name.into()),
            ..Self::new(work)
        }
    }

    /// The task's submission-order id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's diagnostic name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo::new(self.id, self.name.clone())
    }

    /// Rewraps the work while keeping the task's identity.
    ///
    /// The wrapper receives the original task and decides how to run it.
    pub(crate) fn wrap<F>(self, wrapper: F) -> Task
    where
        F: FnOnce(Task) + Send + 'static,
    {
        Task {
            id: self.id,
            name: self.name.clone(),
            work: Box::new(move || wrapper(self)),
        }
    }

    /// Runs the task, consuming it.
    pub fn run(self) {
        (self.work)();
    }

    /// Runs the task, containing a panic so the calling lane survives it.
    ///
    /// Returns `false` if the task panicked.
    pub(crate) fn run_contained(self, lane: &str) -> bool {
        let id = self.id;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(self.work)) {
            Ok(()) => true,
            Err(payload) => {
                tracing::error!(
                    lane = %lane,
                    task = %id,
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                );
                false
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic)")
}
