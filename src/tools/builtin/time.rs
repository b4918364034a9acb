//! Clock tool.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskContext;
use crate::tools::contract::{FieldType, InputContract};
use crate::tools::tool::{ToolError, TypedTool};

pub struct TimeTool;

#[derive(Debug, Default, Deserialize)]
pub struct TimeInput {
    /// Offset from UTC in minutes.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct TimeOutput {
    pub iso: String,
    pub unix: i64,
}

#[async_trait]
impl TypedTool for TimeTool {
    type Input = TimeInput;
    type Output = TimeOutput;

    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted to a UTC offset."
    }

    fn contract(&self) -> InputContract {
        InputContract::new().optional(
            "utc_offset_minutes",
            FieldType::Integer,
            "Offset from UTC in minutes (e.g. -300 for UTC-5)",
        )
    }

    async fn run(&self, input: TimeInput, _ctx: &TaskContext) -> Result<TimeOutput, ToolError> {
        let now = Utc::now();
        let minutes = input.utc_offset_minutes.unwrap_or(0);
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::InvalidParameters {
                name: "time".to_string(),
                reason: format!("offset of {minutes} minutes is out of range"),
            })?;

        Ok(TimeOutput {
            iso: now.with_timezone(&offset).to_rfc3339(),
            unix: now.timestamp(),
        })
    }
}
