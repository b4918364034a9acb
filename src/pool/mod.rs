//! Task pool: priority queue, admission and lifecycle events.

pub mod events;
pub mod queue;
pub mod scheduler;

pub use events::{EVENT_CHANNEL_CAPACITY, PoolEvent};
pub use queue::PendingQueue;
pub use scheduler::{AgentPool, PoolStats};
