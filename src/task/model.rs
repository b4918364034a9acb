//! Task record.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::llm::TokenUsage;
use crate::task::checkpoint::{Checkpoint, CheckpointState, ToolCallOutput, ToolCallRecord};
use crate::task::state::TaskStatus;

/// Scheduling priority. Declaration order is admission order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Position in admission order (0 = admitted first).
    pub fn rank(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Opaque caller/environment identifiers travelling with a task.
///
/// Handed to every tool invocation of the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContext(BTreeMap<String, serde_json::Value>);

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying the workspace and client identifiers.
    pub fn for_client(workspace_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::new()
            .with("workspace_id", workspace_id.into())
            .with("client_id", client_id.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.get_str("workspace_id")
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get_str("client_id")
    }

    /// Whether `key` is present with the string value `value`.
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.get_str(key) == Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// Final output of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub text: String,
    /// Tool-use round trips performed.
    pub iterations: u32,
    pub usage: TokenUsage,
    /// Set when the iteration cap forced termination.
    pub degraded: bool,
}

/// One unit of work routed to an agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Agent type the task is routed to.
    pub agent: String,
    pub input: String,
    pub context: TaskContext,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Task {
    /// Create a new queued task.
    pub fn new(
        agent: impl Into<String>,
        input: impl Into<String>,
        context: TaskContext,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.into(),
            input: input.into(),
            context,
            priority,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
            error: None,
            checkpoints: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a new status, stamping timestamps.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }

        self.status = target;
        match target {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Queued => {}
        }
        Ok(())
    }

    /// Mark running. A task that is already running is left alone.
    pub fn start(&mut self) -> Result<(), TaskError> {
        if self.status == TaskStatus::Running {
            return Ok(());
        }
        self.transition_to(TaskStatus::Running)
    }

    pub fn complete(&mut self, result: TaskResult) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Cancelled)
    }

    /// Put a failed task back in the queue. Only the retry transition calls this.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Queued;
        self.retry_count += 1;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Append a checkpoint and return its id.
    ///
    /// The timestamp never precedes the previous checkpoint's.
    pub fn checkpoint(
        &mut self,
        state: CheckpointState,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Uuid {
        let now = Utc::now();
        let timestamp = match self.checkpoints.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };

        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            timestamp,
            state,
            content: content.into(),
            tool_calls,
        };
        let id = checkpoint.id;
        self.checkpoints.push(checkpoint);
        id
    }

    /// Attach the output of the `index`-th tool call of a checkpoint.
    pub fn attach_tool_output(
        &mut self,
        checkpoint_id: Uuid,
        index: usize,
        output: ToolCallOutput,
    ) -> Result<(), TaskError> {
        let call = self
            .checkpoints
            .iter_mut()
            .rev()
            .find(|c| c.id == checkpoint_id)
            .and_then(|c| c.tool_calls.get_mut(index))
            .ok_or(TaskError::NoSuchToolCall {
                checkpoint_id,
                index,
            })?;

        if call.output.is_some() {
            return Err(TaskError::OutputAlreadyAttached {
                checkpoint_id,
                index,
            });
        }
        call.output = Some(output);
        Ok(())
    }

    pub fn checkpoints_in(&self, state: CheckpointState) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter().filter(move |c| c.state == state)
    }

    /// Time spent in the current (or last) attempt.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}
