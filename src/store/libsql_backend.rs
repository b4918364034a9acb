//! libSQL backend: `TaskStore` over a local or in-memory database.
//!
//! Scalar fields get their own columns so they can be filtered; context,
//! result and checkpoints are stored as JSON text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::TaskStore;
use crate::task::{Checkpoint, Task, TaskContext, TaskResult, TaskStatus};

/// libSQL task store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlTaskStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTaskStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Task store opened");
        Ok(store)
    }

    /// Create an in-memory database.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(field: &str, s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
}

const TASK_COLUMNS: &str = "id, agent, input, context, priority, status, created_at, started_at, completed_at, retry_count, result, error, checkpoints";

/// Map a libsql Row to a Task.
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("column {i}: {e}")))
    };

    let id_str = get_text(0)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("id: {e}")))?;
    let priority = get_text(4)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let status: TaskStatus = get_text(5)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let started_at: Option<String> = row.get(7).ok();
    let completed_at: Option<String> = row.get(8).ok();
    let retry_count: i64 = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("retry_count: {e}")))?;
    let result: Option<String> = row.get(10).ok();
    let error: Option<String> = row.get(11).ok();

    let context: TaskContext = from_json("context", &get_text(3)?)?;
    let result: Option<TaskResult> = result
        .as_deref()
        .map(|s| from_json("result", s))
        .transpose()?;
    let checkpoints: Vec<Checkpoint> = from_json("checkpoints", &get_text(12)?)?;

    Ok(Task {
        id,
        agent: get_text(1)?,
        input: get_text(2)?,
        context,
        priority,
        status,
        created_at: parse_datetime(&get_text(6)?),
        started_at: started_at.as_deref().map(parse_datetime),
        completed_at: completed_at.as_deref().map(parse_datetime),
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        result,
        error,
        checkpoints,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO agent_tasks (id, agent, input, context, priority, status, created_at, started_at, completed_at, retry_count, result, error, checkpoints, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    task.id.to_string(),
                    task.agent.clone(),
                    task.input.clone(),
                    to_json(&task.context)?,
                    task.priority.as_str(),
                    task.status.as_str(),
                    task.created_at.to_rfc3339(),
                    opt_text(task.started_at.map(|t| t.to_rfc3339())),
                    opt_text(task.completed_at.map(|t| t.to_rfc3339())),
                    i64::from(task.retry_count),
                    opt_text(task.result.as_ref().map(to_json).transpose()?),
                    opt_text(task.error.clone()),
                    to_json(&task.checkpoints)?,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        debug!(task_id = %task.id, agent = %task.agent, "Task inserted into DB");
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE agent_tasks SET status = ?1, started_at = ?2, completed_at = ?3, retry_count = ?4, result = ?5, error = ?6, checkpoints = ?7, updated_at = ?8 WHERE id = ?9",
                params![
                    task.status.as_str(),
                    opt_text(task.started_at.map(|t| t.to_rfc3339())),
                    opt_text(task.completed_at.map(|t| t.to_rfc3339())),
                    i64::from(task.retry_count),
                    opt_text(task.result.as_ref().map(to_json).transpose()?),
                    opt_text(task.error.clone()),
                    to_json(&task.checkpoints)?,
                    now,
                    task.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::Query(format!(
                "update_task: task {} not found",
                task.id
            )));
        }

        debug!(task_id = %task.id, status = %task.status, "Task updated in DB");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM agent_tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE status = ?1 ORDER BY created_at ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks_by_status: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks_by_status: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use crate::task::{CheckpointState, Priority, ToolCallOutput, ToolCallRecord};

    async fn test_db() -> LibSqlTaskStore {
        LibSqlTaskStore::new_memory().await.unwrap()
    }

    fn make_task() -> Task {
        Task::new(
            "seo-audit",
            "audit example.com",
            TaskContext::for_client("ws_1", "client_1"),
            Priority::Critical,
        )
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let db = test_db().await;
        let task = make_task();
        db.insert(&task).await.unwrap();

        let fetched = db.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.agent, "seo-audit");
        assert_eq!(fetched.priority, Priority::Critical);
        assert_eq!(fetched.status, TaskStatus::Queued);
        assert_eq!(fetched.context.workspace_id(), Some("ws_1"));
        assert!(fetched.started_at.is_none());
        assert!(fetched.result.is_none());
    }

    #[tokio::test]
    async fn get_by_id_not_found() {
        let db = test_db().await;
        assert!(db.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_persists_trace_and_result() {
        let db = test_db().await;
        let mut task = make_task();
        db.insert(&task).await.unwrap();

        task.start().unwrap();
        let cp = task.checkpoint(
            CheckpointState::ToolUse,
            "Using 1 tool(s)",
            vec![ToolCallRecord::pending("call_1", "crawl", serde_json::json!({"url": "x"}))],
        );
        task.attach_tool_output(cp, 0, ToolCallOutput::Success {
            value: serde_json::json!({"pages": 3}),
        })
        .unwrap();
        task.complete(TaskResult {
            text: "3 pages".to_string(),
            iterations: 1,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 4,
            },
            degraded: false,
        })
        .unwrap();
        db.update(&task).await.unwrap();

        let fetched = db.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.checkpoints, task.checkpoints);
        assert_eq!(fetched.result, task.result);

        let completed = db.list_by_status(TaskStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_task_fails() {
        let db = test_db().await;
        assert!(db.update(&make_task()).await.is_err());
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = test_db().await;
        migrations::run_migrations(db.conn()).await.unwrap();
        assert_eq!(migrations::get_current_version(db.conn()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reopen_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.db");
        let task = make_task();
        {
            let db = LibSqlTaskStore::new_local(&path).await.unwrap();
            db.insert(&task).await.unwrap();
        }
        let db = LibSqlTaskStore::new_local(&path).await.unwrap();
        assert_eq!(db.get(task.id).await.unwrap().unwrap().input, "audit example.com");
    }
}
