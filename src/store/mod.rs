//! Persistence layer for task records.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlTaskStore;
pub use memory::InMemoryTaskStore;
pub use traits::TaskStore;
