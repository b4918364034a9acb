//! Agent types: what a task's `agent` field routes to.

use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::tools::ToolRegistry;

/// Static description of one agent type.
///
/// The tool registry is shared read-only by every execution of the type.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools: Arc<ToolRegistry>,
    pub config: ExecutorConfig,
}

impl AgentDefinition {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            tools,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }
}
