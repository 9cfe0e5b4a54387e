//! Deadline-ordered timer storage shared by the executors.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::task::{Task, TaskId, TimerToken};

/// Ordering key: deadline, then the order `push` was called in.
type TimerKey = (Duration, u64);

/// Timers keyed by `(deadline, submission order)`.
///
/// Submission order is stamped on `push`, not taken from the task id, so a
/// task built early but scheduled late still queues behind timers scheduled
/// before it.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    pending: BTreeMap<TimerKey, Task>,
    index: HashMap<TaskId, TimerKey>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, deadline: Duration, task: Task) -> TimerToken {
        let token = TimerToken(task.id());
        let key = (deadline, self.next_seq);
        self.next_seq += 1;
        self.index.insert(task.id(), key);
        self.pending.insert(key, task);
        token
    }

    /// Pops the earliest timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<Task> {
        let (&(deadline, _), _) = self.pending.first_key_value()?;
        if deadline > now {
            return None;
        }
        let (_, task) = self.pending.pop_first()?;
        self.index.remove(&task.id());
        Some(task)
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.pending.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Removes the timer behind `token`, returning its task.
    pub(crate) fn remove(&mut self, token: TimerToken) -> Option<Task> {
        let key = self.index.remove(&token.task_id())?;
        self.pending.remove(&key)
    }

    pub(crate) fn contains(&self, token: TimerToken) -> bool {
        self.index.contains_key(&token.task_id())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Removes every timer, earliest first.
    pub(crate) fn take_all(&mut self) -> Vec<Task> {
        self.index.clear();
        std::mem::take(&mut self.pending).into_values().collect()
    }
}
