//! Reasoning layer: wraps an LLM provider with an agent's prompt and parameters.
//!
//! Turns a raw provider response into either final text or a batch of tool
//! calls, which is the only distinction the executor loop cares about.

use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::error::LlmError;
use crate::llm::{
    ChatMessage, LlmProvider, TokenUsage, ToolCall, ToolCompletionRequest, ToolDefinition,
};

/// Result of a reasoning call: either text or tool calls.
#[derive(Debug, Clone)]
pub enum RespondResult {
    /// The model answered.
    Text(String),
    /// The model wants to call tools.
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        /// Optional text content alongside tool calls.
        content: Option<String>,
    },
}

/// Output from a respond_with_tools call.
#[derive(Debug, Clone)]
pub struct RespondOutput {
    pub result: RespondResult,
    pub usage: TokenUsage,
}

/// Reasoning layer bound to one agent definition.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    system_prompt: Option<String>,
    model: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &ExecutorConfig) -> Self {
        Self {
            llm,
            system_prompt: None,
            model: Some(config.model.clone()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Call the LLM with tool definitions, returning either text or tool calls.
    pub async fn respond_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<RespondOutput, LlmError> {
        let mut request = ToolCompletionRequest::new(messages.to_vec(), tools.to_vec());
        request.system = self.system_prompt.clone();
        request.model = self.model.clone();
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;

        let response = self.llm.complete_with_tools(request).await?;

        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        if response.tool_calls.is_empty() {
            Ok(RespondOutput {
                result: RespondResult::Text(response.content.unwrap_or_default()),
                usage,
            })
        } else {
            Ok(RespondOutput {
                result: RespondResult::ToolCalls {
                    tool_calls: response.tool_calls,
                    content: response.content.filter(|c| !c.trim().is_empty()),
                },
                usage,
            })
        }
    }
}
