//! Task records and their lifecycle.
//!
//! - `model`: the Task itself, priorities, context, results
//! - `state`: status machine (Queued → Running → Completed/Failed/Cancelled)
//! - `checkpoint`: append-only execution trace
//! - `transition`: retry decision applied when an attempt ends

pub mod checkpoint;
pub mod model;
pub mod state;
pub mod transition;

pub use checkpoint::{
    Checkpoint, CheckpointState, ToolCallOutput, ToolCallRecord, ToolFailureKind,
};
pub use model::{Priority, Task, TaskContext, TaskResult};
pub use state::TaskStatus;
pub use transition::{RetryPolicy, Transition, next};
