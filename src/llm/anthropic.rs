//! Anthropic Messages API provider.
//!
//! Maps the crate's conversation model onto content blocks: assistant tool
//! requests become `tool_use` blocks and tool results travel back as
//! `tool_result` blocks inside a user turn.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, FinishReason, LlmProvider, Role, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse, ToolDefinition,
};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiToolDef>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiToolDef {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_API_BASE)
    }

    /// Provider pointed at a custom endpoint (proxies, tests).
    pub fn with_base_url(
        api_key: SecretString,
        model: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.into(),
            model: model.into(),
        }
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .filter_map(|m| {
                let (role, content) = match m.role {
                    Role::User => ("user", vec![RequestBlock::Text {
                        text: m.content.clone(),
                    }]),
                    Role::Assistant => {
                        let mut blocks = Vec::with_capacity(m.tool_calls.len() + 1);
                        if !m.content.is_empty() {
                            blocks.push(RequestBlock::Text {
                                text: m.content.clone(),
                            });
                        }
                        blocks.extend(m.tool_calls.iter().map(|c| RequestBlock::ToolUse {
                            id: c.id.clone(),
                            name: c.name.clone(),
                            input: c.arguments.clone(),
                        }));
                        ("assistant", blocks)
                    }
                    Role::Tool => (
                        "user",
                        m.tool_results
                            .iter()
                            .map(|r| RequestBlock::ToolResult {
                                tool_use_id: r.tool_call_id.clone(),
                                content: r.content.clone(),
                                is_error: r.is_error,
                            })
                            .collect(),
                    ),
                };
                // The API rejects empty content arrays.
                (!content.is_empty()).then_some(ApiMessage { role, content })
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDef> {
        tools
            .iter()
            .map(|t| ApiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn parse_response(resp: MessagesResponse) -> ToolCompletionResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ResponseBlock::Unknown => {}
            }
        }

        let finish_reason = match resp.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("tool_use") => FinishReason::ToolUse,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Other,
        };

        ToolCompletionResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            finish_reason,
        }
    }

    async fn send_request(
        &self,
        request: MessagesRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => format!("{}: {}", err.error.error_type, err.error.message),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason,
            });
        }

        let body: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self::parse_response(body))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let api_request = MessagesRequest {
            model: request.model.unwrap_or_else(|| self.model.clone()),
            max_tokens: request.max_tokens,
            system: request.system.filter(|s| !s.is_empty()),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            tools: Self::convert_tools(&request.tools),
        };

        tracing::debug!(
            model = %api_request.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "Sending Anthropic request"
        );

        self.send_request(api_request).await
    }
}
