//! End-to-end tests for the agent pool.
//!
//! Each test builds a pool over a stub reasoning provider and drives tasks
//! through the public API, observing outcomes via `get_task` and events.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;
use uuid::Uuid;

use agent_pool::agent::AgentDefinition;
use agent_pool::config::{ExecutorConfig, PoolConfig};
use agent_pool::error::{LlmError, PoolError};
use agent_pool::llm::{
    FinishReason, LlmProvider, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};
use agent_pool::pool::{AgentPool, PoolEvent};
use agent_pool::store::{InMemoryTaskStore, LibSqlTaskStore, TaskStore};
use agent_pool::task::{CheckpointState, Priority, Task, TaskContext, TaskStatus};
use agent_pool::tools::ToolRegistry;
use agent_pool::tools::builtin::register_builtin_tools;

/// Maximum time any test is allowed to wait before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type Respond = dyn Fn(&ToolCompletionRequest) -> Result<ToolCompletionResponse, String> + Send + Sync;

struct StubLlm {
    respond: Box<Respond>,
    delay: Duration,
}

impl StubLlm {
    fn new(
        respond: impl Fn(&ToolCompletionRequest) -> Result<ToolCompletionResponse, String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(&request).map_err(|reason| LlmError::RequestFailed {
            provider: "stub".to_string(),
            reason,
        })
    }
}

fn text(content: &str) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: Some(content.to_string()),
        tool_calls: vec![],
        input_tokens: 10,
        output_tokens: 2,
        finish_reason: FinishReason::Stop,
    }
}

fn tool_use(name: &str, arguments: serde_json::Value) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            arguments,
        }],
        input_tokens: 10,
        output_tokens: 2,
        finish_reason: FinishReason::ToolUse,
    }
}

fn has_tool_results(request: &ToolCompletionRequest) -> bool {
    request.messages.iter().any(|m| !m.tool_results.is_empty())
}

fn worker(name: &str, config: ExecutorConfig) -> AgentDefinition {
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools).unwrap();
    AgentDefinition::new(name, "You are a test worker.", Arc::new(tools)).with_config(config)
}

async fn start_pool(config: PoolConfig, llm: StubLlm) -> AgentPool {
    let pool = AgentPool::new(config, Arc::new(llm), Arc::new(InMemoryTaskStore::new()));
    pool.register_agent(worker("worker", ExecutorConfig::default()))
        .await
        .unwrap();
    pool
}

async fn submit(pool: &AgentPool, input: &str, priority: Priority) -> Uuid {
    pool.submit_task("worker", input, TaskContext::new(), priority)
        .await
        .unwrap()
}

/// Collect events until `id` reaches a terminal event; returns them all.
async fn until_terminal(events: &mut broadcast::Receiver<PoolEvent>, id: Uuid) -> Vec<PoolEvent> {
    let mut seen = Vec::new();
    timeout(TEST_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            let done = event.task_id() == Some(id) && event.is_terminal();
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("task did not finish in time");
    seen
}

/// Like [`until_terminal`], for several tasks finishing in any order.
async fn until_all_terminal(
    events: &mut broadcast::Receiver<PoolEvent>,
    ids: &[Uuid],
) -> Vec<PoolEvent> {
    let mut pending: HashSet<Uuid> = ids.iter().copied().collect();
    let mut seen = Vec::new();
    timeout(TEST_TIMEOUT, async {
        while !pending.is_empty() {
            let event = events.recv().await.expect("event stream closed");
            if event.is_terminal()
                && let Some(id) = event.task_id()
            {
                pending.remove(&id);
            }
            seen.push(event);
        }
    })
    .await
    .expect("tasks did not finish in time");
    seen
}

async fn finished(pool: &AgentPool, id: Uuid) -> Task {
    let task = pool.get_task(id).await.expect("task exists");
    assert!(task.is_terminal(), "task {id} is {}", task.status);
    task
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn text_reply_completes_with_thinking_and_result_checkpoints() {
    let pool = start_pool(PoolConfig::default(), StubLlm::new(|_| Ok(text("done")))).await;
    let mut events = pool.subscribe();

    let id = submit(&pool, "say done", Priority::High).await;
    until_terminal(&mut events, id).await;

    let task = finished(&pool, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.as_ref().unwrap();
    assert_eq!(result.text, "done");
    assert!(!result.degraded);

    let states: Vec<CheckpointState> = task.checkpoints.iter().map(|c| c.state).collect();
    assert_eq!(states, vec![CheckpointState::Thinking, CheckpointState::Result]);
    assert_eq!(task.checkpoints[0].content, "Starting task: say done");
}

#[tokio::test]
async fn missing_tool_becomes_error_output_not_failure() {
    let llm = StubLlm::new(|req| {
        if has_tool_results(req) {
            Ok(text("ok"))
        } else {
            Ok(tool_use("missing-tool", serde_json::json!({})))
        }
    });
    let pool = start_pool(PoolConfig::default(), llm).await;
    let mut events = pool.subscribe();

    let id = submit(&pool, "use a tool", Priority::Medium).await;
    let seen = until_terminal(&mut events, id).await;

    let task = finished(&pool, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_ref().unwrap().text, "ok");

    let tool_use: Vec<_> = task.checkpoints_in(CheckpointState::ToolUse).collect();
    assert_eq!(tool_use.len(), 1);
    assert_eq!(tool_use[0].tool_calls.len(), 1);
    let output = tool_use[0].tool_calls[0].output.as_ref().expect("output attached");
    assert!(output.is_error());

    assert!(seen.iter().any(|e| matches!(
        e,
        PoolEvent::ToolError { task_id, tool_name, .. } if *task_id == id && tool_name == "missing-tool"
    )));
}

#[tokio::test]
async fn concurrency_limit_holds_back_third_task() {
    let config = PoolConfig {
        max_concurrent_tasks: 2,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("slept"))).with_delay(Duration::from_millis(100));
    let pool = start_pool(config, llm).await;
    let mut events = pool.subscribe();

    let ids = vec![
        submit(&pool, "one", Priority::Medium).await,
        submit(&pool, "two", Priority::Medium).await,
        submit(&pool, "three", Priority::Medium).await,
    ];

    let stats = pool.stats().await;
    assert_eq!(stats.running, 2);
    assert_eq!(stats.queued, 1);

    until_all_terminal(&mut events, &ids).await;
    for id in ids {
        assert_eq!(finished(&pool, id).await.status, TaskStatus::Completed);
    }
    assert_eq!(pool.stats().await.running, 0);
}

#[tokio::test]
async fn failing_task_is_retried_until_budget_runs_out() {
    let config = PoolConfig {
        max_retries: 2,
        ..PoolConfig::default()
    };
    let pool = start_pool(config, StubLlm::new(|_| Err("model unavailable".to_string()))).await;
    let mut events = pool.subscribe();

    let id = submit(&pool, "doomed", Priority::Medium).await;
    let seen = until_terminal(&mut events, id).await;

    let task = finished(&pool, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error.as_deref().unwrap().contains("model unavailable"));

    let retries = seen
        .iter()
        .filter(|e| matches!(e, PoolEvent::Retrying { task_id, .. } if *task_id == id))
        .count();
    let starts = seen
        .iter()
        .filter(|e| matches!(e, PoolEvent::Started { task_id, .. } if *task_id == id))
        .count();
    assert_eq!(retries, 2);
    assert_eq!(starts, 3);
    assert!(matches!(
        seen.last(),
        Some(PoolEvent::Failed { retry_count: 2, .. })
    ));
}

#[tokio::test]
async fn iteration_cap_forces_degraded_completion() {
    let llm = StubLlm::new(|_| Ok(tool_use("echo", serde_json::json!({"message": "again"}))));
    let pool = AgentPool::new(
        PoolConfig::default(),
        Arc::new(llm),
        Arc::new(InMemoryTaskStore::new()),
    );
    let config = ExecutorConfig {
        max_iterations: 5,
        ..ExecutorConfig::default()
    };
    pool.register_agent(worker("looper", config)).await.unwrap();
    let mut events = pool.subscribe();

    let id = pool
        .submit_task("looper", "loop forever", TaskContext::new(), Priority::Medium)
        .await
        .unwrap();
    let seen = until_terminal(&mut events, id).await;

    let task = finished(&pool, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.as_ref().unwrap();
    assert!(result.degraded);
    assert_eq!(result.iterations, 5);
    assert_eq!(task.checkpoints_in(CheckpointState::ToolUse).count(), 5);
    assert!(matches!(
        seen.last(),
        Some(PoolEvent::Completed { iterations: 5, degraded: true, .. })
    ));
}

// ── Properties ──────────────────────────────────────────────────────

fn admission_order(events: &[PoolEvent]) -> Vec<Uuid> {
    events
        .iter()
        .filter_map(|e| match e {
            PoolEvent::Started { task_id, .. } => Some(*task_id),
            _ => None,
        })
        .collect()
}

/// Saturate a single-slot pool, then queue one low and one critical task
/// in the given order. Returns (blocker, low, critical, admission order).
async fn race_priorities(critical_first: bool) -> (Uuid, Uuid, Uuid, Vec<Uuid>) {
    let config = PoolConfig {
        max_concurrent_tasks: 1,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("done"))).with_delay(Duration::from_millis(50));
    let pool = start_pool(config, llm).await;
    let mut events = pool.subscribe();

    let blocker = submit(&pool, "blocker", Priority::Medium).await;
    let (low, critical) = if critical_first {
        let critical = submit(&pool, "critical", Priority::Critical).await;
        (submit(&pool, "low", Priority::Low).await, critical)
    } else {
        let low = submit(&pool, "low", Priority::Low).await;
        (low, submit(&pool, "critical", Priority::Critical).await)
    };

    let seen = until_all_terminal(&mut events, &[blocker, low, critical]).await;
    for id in [blocker, low, critical] {
        assert_eq!(finished(&pool, id).await.status, TaskStatus::Completed);
    }
    (blocker, low, critical, admission_order(&seen))
}

#[tokio::test]
async fn higher_priority_is_admitted_first_when_submitted_last() {
    let (blocker, low, critical, order) = race_priorities(false).await;
    assert_eq!(order, vec![blocker, critical, low]);
}

#[tokio::test]
async fn higher_priority_is_admitted_first_when_submitted_first() {
    let (blocker, low, critical, order) = race_priorities(true).await;
    assert_eq!(order, vec![blocker, critical, low]);
}

#[tokio::test]
async fn retried_task_goes_behind_fresh_work_of_its_band() {
    let config = PoolConfig {
        max_concurrent_tasks: 1,
        ..PoolConfig::default()
    };
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = failed_once.clone();
    let llm = StubLlm::new(move |req| {
        let flaky = req.messages.first().is_some_and(|m| m.content == "flaky");
        if flaky && !flag.swap(true, Ordering::SeqCst) {
            Err("transient outage".to_string())
        } else {
            Ok(text("done"))
        }
    })
    .with_delay(Duration::from_millis(50));
    let pool = start_pool(config, llm).await;
    let mut events = pool.subscribe();

    let flaky = submit(&pool, "flaky", Priority::Medium).await;
    let fresh = submit(&pool, "fresh", Priority::Medium).await;

    let seen = until_all_terminal(&mut events, &[flaky, fresh]).await;
    assert_eq!(admission_order(&seen), vec![flaky, fresh, flaky]);

    let retried = finished(&pool, flaky).await;
    assert_eq!(retried.status, TaskStatus::Completed);
    assert_eq!(retried.retry_count, 1);
    assert!(failed_once.load(Ordering::SeqCst));
}

#[tokio::test]
async fn running_count_never_exceeds_limit() {
    let config = PoolConfig {
        max_concurrent_tasks: 2,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("done"))).with_delay(Duration::from_millis(30));
    let pool = start_pool(config, llm).await;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(submit(&pool, &format!("task {i}"), Priority::Medium).await);
    }

    timeout(TEST_TIMEOUT, async {
        loop {
            let stats = pool.stats().await;
            assert!(stats.running <= 2, "running = {}", stats.running);
            if stats.finished == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tasks did not finish in time");
}

#[tokio::test]
async fn terminal_tasks_stay_terminal() {
    let pool = start_pool(PoolConfig::default(), StubLlm::new(|_| Ok(text("done")))).await;
    let mut events = pool.subscribe();

    let id = submit(&pool, "finish", Priority::Medium).await;
    until_terminal(&mut events, id).await;
    let before = finished(&pool, id).await;

    assert!(!pool.cancel_task(id).await);
    assert!(!pool.cancel_task(id).await);
    assert!(!pool.cancel_task(Uuid::new_v4()).await);

    let after = finished(&pool, id).await;
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.completed_at, before.completed_at);
}

#[tokio::test]
async fn cancelling_a_running_task_discards_its_late_result() {
    let llm = StubLlm::new(|_| Ok(text("too late"))).with_delay(Duration::from_millis(200));
    let pool = start_pool(PoolConfig::default(), llm).await;
    let mut events = pool.subscribe();

    let id = submit(&pool, "slow", Priority::Medium).await;
    assert!(pool.cancel_task(id).await);
    until_terminal(&mut events, id).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let task = finished(&pool, id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert_eq!(
        task.checkpoints.last().map(|c| c.content.as_str()),
        Some("Task cancelled")
    );
}

#[tokio::test]
async fn unregistered_agent_fails_queued_task_at_admission() {
    let config = PoolConfig {
        max_concurrent_tasks: 1,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("done"))).with_delay(Duration::from_millis(50));
    let pool = start_pool(config, llm).await;
    pool.register_agent(worker("temp", ExecutorConfig::default()))
        .await
        .unwrap();
    let mut events = pool.subscribe();

    submit(&pool, "blocker", Priority::Medium).await;
    let orphan = pool
        .submit_task("temp", "never runs", TaskContext::new(), Priority::Medium)
        .await
        .unwrap();
    assert!(pool.unregister_agent("temp").await);
    assert!(!pool.unregister_agent("temp").await);

    until_terminal(&mut events, orphan).await;
    let task = finished(&pool, orphan).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_deref(),
        Some("No agent registered for type temp")
    );
    assert_eq!(task.retry_count, 0);
}

#[tokio::test]
async fn full_queue_rejects_new_submissions() {
    let config = PoolConfig {
        max_concurrent_tasks: 1,
        max_queue_size: 2,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("done"))).with_delay(Duration::from_millis(200));
    let pool = start_pool(config, llm).await;

    for i in 0..3 {
        submit(&pool, &format!("task {i}"), Priority::Low).await;
    }
    let err = pool
        .submit_task("worker", "overflow", TaskContext::new(), Priority::Critical)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::CapacityExceeded { limit: 2 }));
}

#[tokio::test]
async fn context_lookup_spans_all_lifecycle_stages() {
    let config = PoolConfig {
        max_concurrent_tasks: 1,
        ..PoolConfig::default()
    };
    let llm = StubLlm::new(|_| Ok(text("done"))).with_delay(Duration::from_millis(50));
    let pool = start_pool(config, llm).await;

    let ctx = TaskContext::for_client("ws-1", "client-9");
    let a = pool
        .submit_task("worker", "a", ctx.clone(), Priority::Medium)
        .await
        .unwrap();
    let b = pool
        .submit_task("worker", "b", ctx, Priority::Medium)
        .await
        .unwrap();
    submit(&pool, "unrelated", Priority::Medium).await;

    let found: Vec<Uuid> = pool
        .tasks_for_context("workspace_id", "ws-1")
        .await
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(found, vec![a, b]);
}

#[tokio::test]
async fn task_history_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    let id = {
        let store: Arc<dyn TaskStore> = Arc::new(LibSqlTaskStore::new_local(&path).await.unwrap());
        let llm = StubLlm::new(|req| {
            if has_tool_results(req) {
                Ok(text("echoed"))
            } else {
                Ok(tool_use("echo", serde_json::json!({"message": "hi"})))
            }
        });
        let pool = AgentPool::new(PoolConfig::default(), Arc::new(llm), store);
        pool.register_agent(worker("worker", ExecutorConfig::default()))
            .await
            .unwrap();
        let mut events = pool.subscribe();

        let id = submit(&pool, "echo hi", Priority::High).await;
        until_terminal(&mut events, id).await;
        pool.flush_store().await;
        id
    };

    let reopened = LibSqlTaskStore::new_local(&path).await.unwrap();
    let task = reopened.get(id).await.unwrap().expect("persisted");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.priority, Priority::High);
    assert_eq!(task.result.as_ref().unwrap().text, "echoed");

    let tool_use: Vec<_> = task.checkpoints_in(CheckpointState::ToolUse).collect();
    assert_eq!(tool_use.len(), 1);
    assert!(tool_use[0].is_complete());
}
