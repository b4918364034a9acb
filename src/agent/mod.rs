//! Agent types and the executor that runs their tasks.

pub mod definition;
pub mod executor;

pub use definition::AgentDefinition;
pub use executor::{Executor, ExecutorStatus};
