//! Error types for the agent pool.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Reasoning-capability errors. Fatal to the current attempt of a task.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool errors. Per-call and never fatal to the task that raised them.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} is already registered")]
    Duplicate { name: String },
}

/// Task record errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Checkpoint {checkpoint_id} has no tool call at index {index}")]
    NoSuchToolCall { checkpoint_id: Uuid, index: usize },

    #[error("Tool call {index} of checkpoint {checkpoint_id} already has an output")]
    OutputAlreadyAttached { checkpoint_id: Uuid, index: usize },
}

/// Executor errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor for agent {agent} is already running task {task_id}")]
    AlreadyRunning { agent: String, task_id: Uuid },

    #[error("Execution of task {task_id} aborted: {reason}")]
    Aborted { task_id: Uuid, reason: String },
}

/// Pool / scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("No agent registered for type {agent}")]
    UnknownAgent { agent: String },

    #[error("Agent {agent} is already registered")]
    AgentAlreadyRegistered { agent: String },

    #[error("Task queue is full ({limit} pending tasks)")]
    CapacityExceeded { limit: usize },

    #[error("Pool is shutting down")]
    ShuttingDown,
}

/// Result type alias for the pool.
pub type Result<T> = std::result::Result<T, Error>;
