//! Checkpoints: the append-only execution trace of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;

/// What a checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Thinking,
    ToolUse,
    Result,
    Error,
}

impl CheckpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a task's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub state: CheckpointState,
    pub content: String,
    /// Tool calls requested in this step (only for `tool_use`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Checkpoint {
    /// A tool_use checkpoint is complete once every call has an output.
    pub fn is_complete(&self) -> bool {
        self.tool_calls.iter().all(|c| c.output.is_some())
    }
}

/// A single requested tool invocation and, once produced, its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Call id assigned by the reasoning provider.
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// Written exactly once, by the invocation that produced it.
    pub output: Option<ToolCallOutput>,
}

impl ToolCallRecord {
    pub fn pending(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
        }
    }
}

/// Why a tool call produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotFound,
    InvalidInput,
    ExecutionFailed,
    TimedOut,
}

/// Outcome of one tool call as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallOutput {
    Success { value: serde_json::Value },
    Error { kind: ToolFailureKind, message: String },
}

impl ToolCallOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text handed back to the reasoning provider for this call.
    pub fn to_llm_content(&self) -> String {
        match self {
            Self::Success { value } => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Error { message, .. } => format!("Error: {message}"),
        }
    }
}

impl From<&ToolError> for ToolCallOutput {
    fn from(err: &ToolError) -> Self {
        let kind = match err {
            ToolError::NotFound { .. } => ToolFailureKind::NotFound,
            ToolError::InvalidParameters { .. } => ToolFailureKind::InvalidInput,
            ToolError::Timeout { .. } => ToolFailureKind::TimedOut,
            ToolError::ExecutionFailed { .. } | ToolError::Duplicate { .. } => {
                ToolFailureKind::ExecutionFailed
            }
        };
        Self::Error {
            kind,
            message: err.to_string(),
        }
    }
}
