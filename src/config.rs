//! Configuration types.
//!
//! Every struct has a `Default` matching the documented defaults, plus a
//! `from_env()` constructor reading `AGENT_POOL_*` variables. Parsing goes
//! through a lookup closure so it can be exercised without touching the
//! process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Scheduler / pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Soft limit on pending tasks; submissions beyond it are rejected.
    pub max_queue_size: usize,
    /// Whether failed tasks are re-queued.
    pub retry_failed_tasks: bool,
    /// Maximum number of retries per task.
    pub max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_queue_size: 100,
            retry_failed_tasks: true,
            max_retries: 3,
        }
    }
}

impl PoolConfig {
    /// Build from `AGENT_POOL_MAX_CONCURRENT`, `AGENT_POOL_QUEUE_SIZE`,
    /// `AGENT_POOL_RETRY` and `AGENT_POOL_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_concurrent_tasks: parse_or(
                &lookup,
                "AGENT_POOL_MAX_CONCURRENT",
                defaults.max_concurrent_tasks,
            )?,
            max_queue_size: parse_or(&lookup, "AGENT_POOL_QUEUE_SIZE", defaults.max_queue_size)?,
            retry_failed_tasks: parse_or(&lookup, "AGENT_POOL_RETRY", defaults.retry_failed_tasks)?,
            max_retries: parse_or(&lookup, "AGENT_POOL_MAX_RETRIES", defaults.max_retries)?,
        };

        if config.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_POOL_MAX_CONCURRENT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> crate::task::RetryPolicy {
        crate::task::RetryPolicy {
            enabled: self.retry_failed_tasks,
            max_retries: self.max_retries,
        }
    }
}

/// Per-agent execution parameters.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Model identifier passed to the reasoning provider.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Cap on tool-use round trips before a degraded completion is forced.
    pub max_iterations: u32,
    /// Optional wall-clock limit for one attempt of a task.
    pub timeout: Option<Duration>,
    /// Run the tool calls of one iteration concurrently instead of in order.
    pub parallel_tools: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_iterations: 10,
            timeout: None,
            parallel_tools: false,
        }
    }
}

impl ExecutorConfig {
    /// Build from `AGENT_POOL_MODEL`, `AGENT_POOL_MAX_TOKENS`,
    /// `AGENT_POOL_TEMPERATURE`, `AGENT_POOL_MAX_ITERATIONS`,
    /// `AGENT_POOL_TASK_TIMEOUT_SECS` and `AGENT_POOL_PARALLEL_TOOLS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = parse_or(&lookup, "AGENT_POOL_TASK_TIMEOUT_SECS", 0)?;

        let config = Self {
            model: lookup("AGENT_POOL_MODEL").unwrap_or(defaults.model),
            max_tokens: parse_or(&lookup, "AGENT_POOL_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_or(&lookup, "AGENT_POOL_TEMPERATURE", defaults.temperature)?,
            max_iterations: parse_or(&lookup, "AGENT_POOL_MAX_ITERATIONS", defaults.max_iterations)?,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            parallel_tools: parse_or(&lookup, "AGENT_POOL_PARALLEL_TOOLS", defaults.parallel_tools)?,
        };

        if config.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_POOL_MAX_ITERATIONS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
