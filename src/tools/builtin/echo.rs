//! Echo tool: returns its message unchanged.

use std::time::Instant;

use async_trait::async_trait;

use crate::task::TaskContext;
use crate::tools::contract::{FieldType, InputContract};
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_str};

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeat a message back verbatim. Useful for quoting text into the conversation."
    }

    fn contract(&self) -> InputContract {
        InputContract::new().required("message", FieldType::String, "Text to echo back")
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &TaskContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let message = require_str(&params, self.name(), "message")?;
        Ok(ToolOutput::text(message, start.elapsed()))
    }
}
