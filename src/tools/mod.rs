//! Tool abstraction for agent capabilities.

pub mod builtin;
pub mod contract;
pub mod registry;
pub mod tool;

pub use contract::{FieldSpec, FieldType, InputContract};
pub use registry::ToolRegistry;
pub use tool::*;
