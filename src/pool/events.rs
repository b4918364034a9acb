//! Pool event stream.
//!
//! Broadcast on a bounded channel. Delivery is best-effort: a subscriber that
//! falls behind receives `RecvError::Lagged` and misses events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{CheckpointState, Priority, ToolFailureKind};

/// Capacity of the pool's broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Task accepted into the pending queue.
    Queued {
        task_id: Uuid,
        agent: String,
        priority: Priority,
    },
    /// Task admitted into execution.
    Started {
        task_id: Uuid,
        agent: String,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    CheckpointCreated {
        task_id: Uuid,
        checkpoint_id: Uuid,
        state: CheckpointState,
    },
    ToolExecuted {
        task_id: Uuid,
        tool_name: String,
        /// First 200 chars of the output.
        summary: String,
    },
    ToolError {
        task_id: Uuid,
        tool_name: String,
        kind: ToolFailureKind,
        error: String,
    },
    Completed {
        task_id: Uuid,
        iterations: u32,
        degraded: bool,
    },
    /// Terminal failure; no retries remain.
    Failed {
        task_id: Uuid,
        error: String,
        retry_count: u32,
    },
    /// Failed attempt re-enqueued.
    Retrying {
        task_id: Uuid,
        retry_count: u32,
        error: String,
    },
    Cancelled {
        task_id: Uuid,
    },
    AgentRegistered {
        agent: String,
    },
    AgentUnregistered {
        agent: String,
    },
}

impl PoolEvent {
    /// Task the event belongs to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::Queued { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::CheckpointCreated { task_id, .. }
            | Self::ToolExecuted { task_id, .. }
            | Self::ToolError { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Retrying { task_id, .. }
            | Self::Cancelled { task_id } => Some(*task_id),
            Self::AgentRegistered { .. } | Self::AgentUnregistered { .. } => None,
        }
    }

    /// Whether this is the last event a task will produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }

    /// Event type name (matches the serde tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ToolError { .. } => "tool_error",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Retrying { .. } => "retrying",
            Self::Cancelled { .. } => "cancelled",
            Self::AgentRegistered { .. } => "agent_registered",
            Self::AgentUnregistered { .. } => "agent_unregistered",
        }
    }
}
