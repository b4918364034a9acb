//! Task status machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending queue.
    Queued,
    /// Owned by an executor.
    Running,
    /// Finished with a result (possibly degraded).
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// The retry edge `Failed -> Queued` is not listed: only the retry
    /// transition in [`crate::task::next`] may take it, before the failure
    /// is recorded as terminal.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::{Cancelled, Completed, Failed, Queued, Running};

        matches!(
            (self, target),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}
