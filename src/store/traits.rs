//! `TaskStore`: async persistence interface for task records.
//!
//! The pool writes every lifecycle change through this trait. Writes are
//! best-effort from the pool's point of view: failures are logged, never
//! surfaced to the submitter.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::task::{Task, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a newly submitted task.
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Overwrite the stored record of an existing task.
    async fn update(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Tasks currently stored with `status`, oldest first.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError>;
}
