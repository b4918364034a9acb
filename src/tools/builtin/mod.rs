//! Built-in tools available to any agent type.

pub mod echo;
pub mod time;

pub use echo::EchoTool;
pub use time::TimeTool;

use std::sync::Arc;

use crate::error::ToolError;
use crate::tools::ToolRegistry;

/// Register `echo` and `time`.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Arc::new(EchoTool))?;
    registry.register_typed(TimeTool)?;
    Ok(())
}
