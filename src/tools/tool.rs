//! Tool trait and the typed-tool adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use crate::error::ToolError;
use crate::task::TaskContext;
use crate::tools::contract::InputContract;

/// Default bound on a single handler call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Value produced by a tool call.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }
}

/// A capability the reasoning provider can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn contract(&self) -> InputContract;

    /// JSON Schema offered to the reasoning provider.
    fn parameters_schema(&self) -> serde_json::Value {
        self.contract().to_json_schema()
    }

    fn execution_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Tool with typed input and output.
///
/// Wrap in [`Typed`] to register it; the wrapper handles the JSON boundary.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn contract(&self) -> InputContract;

    fn execution_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    async fn run(&self, input: Self::Input, ctx: &TaskContext) -> Result<Self::Output, ToolError>;
}

/// Adapts a [`TypedTool`] to the string-keyed [`Tool`] boundary.
pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn contract(&self) -> InputContract {
        self.0.contract()
    }

    fn execution_timeout(&self) -> Duration {
        self.0.execution_timeout()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let params = match params {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        let input: T::Input =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let output = self.0.run(input, ctx).await?;
        let value = serde_json::to_value(output).map_err(|e| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            reason: format!("unserializable output: {e}"),
        })?;

        Ok(ToolOutput::success(value, start.elapsed()))
    }
}

/// Extract a required string parameter.
pub fn require_str<'a>(
    params: &'a serde_json::Value,
    tool: &str,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{key}' parameter"),
        })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::tools::contract::FieldType;

    struct Scorer;

    #[derive(Deserialize)]
    struct ScoreInput {
        words: Vec<String>,
    }

    #[derive(Serialize)]
    struct ScoreOutput {
        count: usize,
        workspace: Option<String>,
    }

    #[async_trait]
    impl TypedTool for Scorer {
        type Input = ScoreInput;
        type Output = ScoreOutput;

        fn name(&self) -> &str {
            "score"
        }

        fn description(&self) -> &str {
            "Count words"
        }

        fn contract(&self) -> InputContract {
            InputContract::new().required("words", FieldType::Array, "Words to count")
        }

        async fn run(
            &self,
            input: ScoreInput,
            ctx: &TaskContext,
        ) -> Result<ScoreOutput, ToolError> {
            Ok(ScoreOutput {
                count: input.words.len(),
                workspace: ctx.workspace_id().map(str::to_string),
            })
        }
    }

    #[tokio::test]
    async fn typed_tool_round_trips_json() {
        let tool = Typed(Scorer);
        let ctx = TaskContext::for_client("ws_1", "c_1");
        let out = tool
            .execute(serde_json::json!({"words": ["a", "b"]}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["count"], 2);
        assert_eq!(out.result["workspace"], "ws_1");
        assert_eq!(tool.execution_timeout(), DEFAULT_TOOL_TIMEOUT);
    }

    #[tokio::test]
    async fn typed_tool_rejects_bad_shape() {
        let tool = Typed(Scorer);
        let err = tool
            .execute(serde_json::json!({"words": 3}), &TaskContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters { ref name, .. } if name == "score"));
    }

    #[test]
    fn require_str_reports_missing_key() {
        let params = serde_json::json!({"url": "https://a.io"});
        assert_eq!(require_str(&params, "crawl", "url").unwrap(), "https://a.io");
        assert!(require_str(&params, "crawl", "depth").is_err());
    }
}
