//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::traits::TaskStore;
use crate::task::{Task, TaskStatus};

/// Keeps task records in a map. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(DatabaseError::Query(format!(
                "insert: task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        match self.tasks.write().await.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(DatabaseError::Query(format!(
                "update: task {} not found",
                task.id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskContext};

    #[tokio::test]
    async fn insert_update_get() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("seo", "audit", TaskContext::new(), Priority::Low);
        store.insert(&task).await.unwrap();
        assert!(store.insert(&task).await.is_err());

        task.start().unwrap();
        store.update(&task).await.unwrap();

        let fetched = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Running);
        assert_eq!(store.list_by_status(TaskStatus::Running).await.unwrap().len(), 1);
        assert!(store.list_by_status(TaskStatus::Queued).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_unknown_fails() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("seo", "audit", TaskContext::new(), Priority::Low);
        assert!(store.update(&task).await.is_err());
        assert!(store.get(task.id).await.unwrap().is_none());
    }
}
