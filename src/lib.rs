//! Agent Pool: priority task scheduling over tool-calling agents.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod pool;
pub mod store;
pub mod task;
pub mod tools;

pub use agent::{AgentDefinition, Executor, ExecutorStatus};
pub use config::{ExecutorConfig, PoolConfig};
pub use error::{Error, Result};
pub use pool::{AgentPool, PoolEvent, PoolStats};
pub use task::{Priority, Task, TaskContext, TaskStatus};
