//! Retry transition applied by the pool when an attempt ends.

use crate::task::model::Task;
use crate::task::state::TaskStatus;

/// Fixed retry policy for failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
        }
    }

    pub fn allows_retry(&self, retry_count: u32) -> bool {
        self.enabled && retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
        }
    }
}

/// What the pool does with a task whose attempt just ended.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Record as-is; the status is terminal.
    Finished(Task),
    /// Re-enqueue at the tail of its priority band.
    Requeue(Task),
}

impl Transition {
    pub fn task(&self) -> &Task {
        match self {
            Self::Finished(task) | Self::Requeue(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            Self::Finished(task) | Self::Requeue(task) => task,
        }
    }
}

/// Decide the next state of a task whose attempt ended.
///
/// Failures within the retry budget come back queued with `retry_count + 1`;
/// everything else is final.
pub fn next(task: Task, policy: &RetryPolicy) -> Transition {
    match task.status {
        TaskStatus::Failed if policy.allows_retry(task.retry_count) => {
            let mut task = task;
            task.reset_for_retry();
            Transition::Requeue(task)
        }
        _ => Transition::Finished(task),
    }
}
