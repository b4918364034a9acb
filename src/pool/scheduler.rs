//! Agent pool: priority admission, bounded concurrency, retries.
//!
//! All queue and running-set mutations happen under one `tokio::sync::Mutex`,
//! so completions landing together cannot double-admit. No store call is
//! awaited while that lock is held: lifecycle updates are handed to a single
//! writer task in the order they happen, which keeps each task's stored
//! record monotonic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentDefinition, Executor, ExecutorStatus};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::llm::LlmProvider;
use crate::pool::events::{EVENT_CHANNEL_CAPACITY, PoolEvent};
use crate::pool::queue::PendingQueue;
use crate::store::TaskStore;
use crate::task::{
    CheckpointState, Priority, RetryPolicy, Task, TaskContext, TaskStatus, Transition, next,
};

/// Counters returned by [`AgentPool::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub registered_agents: usize,
    pub queued: usize,
    pub running: usize,
    pub finished: usize,
    pub available_slots: usize,
}

struct RunningTask {
    executor: Arc<Executor>,
    token: CancellationToken,
    progress: watch::Receiver<Task>,
}

impl RunningTask {
    fn snapshot(&self) -> Task {
        self.progress.borrow().clone()
    }
}

#[derive(Default)]
struct PoolState {
    agents: HashMap<String, Arc<AgentDefinition>>,
    queue: PendingQueue,
    running: HashMap<Uuid, RunningTask>,
    finished: HashMap<Uuid, Task>,
    shutting_down: bool,
}

enum StoreOp {
    Update(Task),
    Flush(oneshot::Sender<()>),
}

struct PoolInner {
    config: PoolConfig,
    retry: RetryPolicy,
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn TaskStore>,
    events: broadcast::Sender<PoolEvent>,
    writer: mpsc::UnboundedSender<StoreOp>,
    state: Mutex<PoolState>,
}

/// Handle to a pool. Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

impl AgentPool {
    /// Create a pool. Must be called inside a tokio runtime.
    pub fn new(config: PoolConfig, llm: Arc<dyn LlmProvider>, store: Arc<dyn TaskStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (writer, rx) = mpsc::unbounded_channel();
        tokio::spawn(store_writer(store.clone(), rx));

        tracing::info!(
            max_concurrent = config.max_concurrent_tasks,
            max_queue = config.max_queue_size,
            retries = config.retry_failed_tasks,
            max_retries = config.max_retries,
            "Agent pool started"
        );

        Self {
            inner: Arc::new(PoolInner {
                retry: config.retry_policy(),
                config,
                llm,
                store,
                events,
                writer,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    // ── Agents ──────────────────────────────────────────────────────

    pub async fn register_agent(&self, definition: AgentDefinition) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock().await;
        if state.agents.contains_key(&definition.name) {
            return Err(PoolError::AgentAlreadyRegistered {
                agent: definition.name,
            });
        }

        let name = definition.name.clone();
        tracing::info!(
            agent = %name,
            tools = definition.tools.count(),
            "Registered agent"
        );
        state.agents.insert(name.clone(), Arc::new(definition));
        self.inner.emit(PoolEvent::AgentRegistered { agent: name });
        Ok(())
    }

    /// Remove an agent type. Running tasks finish; queued ones fail at admission.
    pub async fn unregister_agent(&self, name: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.agents.remove(name).is_none() {
            return false;
        }
        tracing::info!(agent = %name, "Unregistered agent");
        self.inner.emit(PoolEvent::AgentUnregistered {
            agent: name.to_string(),
        });
        true
    }

    pub async fn agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().await.agents.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Tasks ───────────────────────────────────────────────────────

    /// Queue a task and return its id. The queued record is persisted first.
    pub async fn submit_task(
        &self,
        agent: &str,
        input: impl Into<String>,
        context: TaskContext,
        priority: Priority,
    ) -> Result<Uuid, PoolError> {
        {
            let state = self.inner.state.lock().await;
            self.inner.check_accepting(&state, agent)?;
        }

        let task = Task::new(agent, input, context, priority);
        let task_id = task.id;
        if let Err(e) = self.inner.store.insert(&task).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to persist submitted task");
        }

        let mut state = self.inner.state.lock().await;
        // Other submissions or a shutdown may have landed while the insert
        // was in flight.
        if let Err(e) = self.inner.check_accepting(&state, agent) {
            tracing::warn!(task_id = %task_id, error = %e, "Submission rejected after insert");
            let mut task = task;
            let _ = task.cancel();
            self.inner.persist(&task);
            state.finished.insert(task_id, task);
            return Err(e);
        }

        tracing::info!(
            task_id = %task_id,
            agent = %agent,
            priority = %priority,
            "Task queued"
        );
        self.inner.emit(PoolEvent::Queued {
            task_id,
            agent: agent.to_string(),
            priority,
        });
        state.queue.push_back(task);
        self.inner.admit(&mut state);

        Ok(task_id)
    }

    /// Snapshot of a task, wherever it is in its lifecycle.
    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        {
            let state = self.inner.state.lock().await;
            if let Some(task) = state.queue.get(task_id) {
                return Some(task.clone());
            }
            if let Some(running) = state.running.get(&task_id) {
                return Some(running.snapshot());
            }
            if let Some(task) = state.finished.get(&task_id) {
                return Some(task.clone());
            }
        }

        match self.inner.store.get(task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to load task from store");
                None
            }
        }
    }

    /// Cancel a queued or running task. False for unknown or finished ids.
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        let mut state = self.inner.state.lock().await;
        let cancelled = self.inner.cancel_locked(&mut state, task_id);
        if cancelled {
            self.inner.admit(&mut state);
        }
        cancelled
    }

    /// All known tasks whose context has `key` set to `value`, oldest first.
    pub async fn tasks_for_context(&self, key: &str, value: &str) -> Vec<Task> {
        let state = self.inner.state.lock().await;
        let mut tasks: Vec<Task> = state
            .queue
            .iter()
            .cloned()
            .chain(state.running.values().map(RunningTask::snapshot))
            .chain(state.finished.values().cloned())
            .filter(|t| t.context.matches(key, value))
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn executor_status(&self, task_id: Uuid) -> Option<ExecutorStatus> {
        let state = self.inner.state.lock().await;
        state.running.get(&task_id).map(|r| r.executor.status())
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        PoolStats {
            registered_agents: state.agents.len(),
            queued: state.queue.len(),
            running: state.running.len(),
            finished: state.finished.len(),
            available_slots: self
                .inner
                .config
                .max_concurrent_tasks
                .saturating_sub(state.running.len()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Drop finished tasks completed before `before`. Returns how many went.
    pub async fn evict_finished(&self, before: DateTime<Utc>) -> usize {
        let mut state = self.inner.state.lock().await;
        let len = state.finished.len();
        state
            .finished
            .retain(|_, t| t.completed_at.is_some_and(|at| at >= before));
        let evicted = len - state.finished.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished tasks");
        }
        evicted
    }

    /// Stop accepting work and cancel every queued and running task.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.shutting_down = true;

            let queued = state.queue.drain();
            let mut count = queued.len();
            for mut task in queued {
                let _ = task.cancel();
                self.inner.record_cancelled(&mut state, task);
            }

            let running: Vec<Uuid> = state.running.keys().copied().collect();
            for id in running {
                if self.inner.cancel_locked(&mut state, id) {
                    count += 1;
                }
            }
            tracing::info!(cancelled = count, "Agent pool shutting down");
        }
        self.flush_store().await;
    }

    /// Wait until every lifecycle update issued so far has reached the store.
    pub async fn flush_store(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.writer.send(StoreOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }

    fn persist(&self, task: &Task) {
        if self.writer.send(StoreOp::Update(task.clone())).is_err() {
            tracing::warn!(task_id = %task.id, "Task store writer is gone; update dropped");
        }
    }

    fn check_accepting(&self, state: &PoolState, agent: &str) -> Result<(), PoolError> {
        if state.shutting_down {
            return Err(PoolError::ShuttingDown);
        }
        if !state.agents.contains_key(agent) {
            return Err(PoolError::UnknownAgent {
                agent: agent.to_string(),
            });
        }
        if state.queue.len() >= self.config.max_queue_size {
            return Err(PoolError::CapacityExceeded {
                limit: self.config.max_queue_size,
            });
        }
        Ok(())
    }

    /// Admit queued tasks while slots are free. Caller holds the state lock.
    fn admit(self: &Arc<Self>, state: &mut PoolState) {
        if state.shutting_down {
            return;
        }

        while state.running.len() < self.config.max_concurrent_tasks {
            let Some(mut task) = state.queue.pop_next() else {
                break;
            };

            let Some(definition) = state.agents.get(&task.agent).cloned() else {
                let reason = format!("No agent registered for type {}", task.agent);
                tracing::warn!(task_id = %task.id, "{}", reason);
                let _ = task.start();
                let _ = task.fail(reason.clone());
                self.emit(PoolEvent::Failed {
                    task_id: task.id,
                    error: reason,
                    retry_count: task.retry_count,
                });
                self.persist(&task);
                state.finished.insert(task.id, task);
                continue;
            };

            if let Err(e) = task.start() {
                tracing::error!(task_id = %task.id, error = %e, "Queued task could not start");
                continue;
            }

            let task_id = task.id;
            let (progress_tx, progress_rx) = watch::channel(task.clone());
            let executor = Arc::new(
                Executor::new(definition, self.llm.clone())
                    .with_events(self.events.clone())
                    .with_progress(progress_tx),
            );
            let token = CancellationToken::new();

            tracing::info!(
                task_id = %task_id,
                agent = %task.agent,
                attempt = task.retry_count + 1,
                running = state.running.len() + 1,
                "Task admitted"
            );
            self.emit(PoolEvent::Started {
                task_id,
                agent: task.agent.clone(),
                attempt: task.retry_count + 1,
            });
            self.persist(&task);

            state.running.insert(
                task_id,
                RunningTask {
                    executor: executor.clone(),
                    token: token.clone(),
                    progress: progress_rx,
                },
            );

            tokio::spawn(self.clone().run(executor, task, token));
        }
    }

    /// Drive one attempt and hand the outcome back to the pool.
    async fn run(self: Arc<Self>, executor: Arc<Executor>, task: Task, token: CancellationToken) {
        let task_id = task.id;
        // A separate task so a panicking executor surfaces as a JoinError.
        let handle = tokio::spawn(async move { executor.execute_with_cancel(task, token).await });

        let outcome = match handle.await {
            Ok(Ok(task)) => Ok(task),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!("Executor panicked: {e}")),
            Err(e) => Err(format!("Execution aborted: {e}")),
        };

        self.finish(task_id, outcome).await;
    }

    async fn finish(self: &Arc<Self>, task_id: Uuid, outcome: Result<Task, String>) {
        let mut state = self.state.lock().await;

        let Some(running) = state.running.remove(&task_id) else {
            tracing::debug!(task_id = %task_id, "Discarding result of cancelled task");
            return;
        };

        let mut task = match outcome {
            Ok(task) => task,
            Err(reason) => {
                tracing::error!(task_id = %task_id, error = %reason, "Execution broke down");
                let mut task = running.snapshot();
                if !task.is_terminal() {
                    task.checkpoint(CheckpointState::Error, reason.clone(), vec![]);
                    let _ = task.start();
                    let _ = task.fail(reason);
                }
                task
            }
        };

        if !task.is_terminal() {
            let _ = task.start();
            let _ = task.fail("Execution ended without a terminal status");
        }

        match next(task, &self.retry) {
            Transition::Requeue(task) => {
                let error = task.error.clone().unwrap_or_default();
                tracing::warn!(
                    task_id = %task_id,
                    retry_count = task.retry_count,
                    max_retries = self.retry.max_retries,
                    error = %error,
                    "Task failed, retrying"
                );
                self.emit(PoolEvent::Retrying {
                    task_id,
                    retry_count: task.retry_count,
                    error,
                });
                self.persist(&task);
                state.queue.push_back(task);
            }
            Transition::Finished(task) => {
                match task.status {
                    TaskStatus::Completed => {
                        let (iterations, degraded) = task
                            .result
                            .as_ref()
                            .map(|r| (r.iterations, r.degraded))
                            .unwrap_or_default();
                        self.emit(PoolEvent::Completed {
                            task_id,
                            iterations,
                            degraded,
                        });
                    }
                    TaskStatus::Cancelled => self.emit(PoolEvent::Cancelled { task_id }),
                    _ => {
                        let error = task.error.clone().unwrap_or_default();
                        tracing::warn!(
                            task_id = %task_id,
                            retry_count = task.retry_count,
                            error = %error,
                            "Task failed permanently"
                        );
                        self.emit(PoolEvent::Failed {
                            task_id,
                            error,
                            retry_count: task.retry_count,
                        });
                    }
                }
                self.persist(&task);
                state.finished.insert(task_id, task);
            }
        }

        self.admit(&mut state);
    }

    /// Cancel under the state lock. Does not admit replacements.
    fn cancel_locked(&self, state: &mut PoolState, task_id: Uuid) -> bool {
        if let Some(mut task) = state.queue.remove(task_id) {
            let _ = task.cancel();
            tracing::info!(task_id = %task_id, "Cancelled queued task");
            self.record_cancelled(state, task);
            return true;
        }

        let Some(running) = state.running.get(&task_id) else {
            return false;
        };

        let snapshot = running.snapshot();
        if self.is_settled(&snapshot) {
            // Finished but not yet collected; its outcome stands.
            return false;
        }

        running.token.cancel();
        state.running.remove(&task_id);

        // A failed attempt with budget left is waiting for its retry.
        let mut task = next(snapshot, &self.retry).into_task();
        task.checkpoint(CheckpointState::Error, "Task cancelled", vec![]);
        let _ = task.cancel();
        tracing::info!(task_id = %task_id, "Cancelled running task");
        self.record_cancelled(state, task);
        true
    }

    /// Whether an attempt's outcome is final under the retry policy.
    fn is_settled(&self, task: &Task) -> bool {
        if task.status.is_active() {
            return false;
        }
        task.status != TaskStatus::Failed || !self.retry.allows_retry(task.retry_count)
    }

    fn record_cancelled(&self, state: &mut PoolState, task: Task) {
        self.emit(PoolEvent::Cancelled { task_id: task.id });
        self.persist(&task);
        state.finished.insert(task.id, task);
    }
}

/// Apply lifecycle updates to the store, in order.
async fn store_writer(store: Arc<dyn TaskStore>, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Update(task) => {
                if let Err(e) = store.update(&task).await {
                    tracing::warn!(
                        task_id = %task.id,
                        status = %task.status,
                        error = %e,
                        "Failed to persist task update"
                    );
                }
            }
            StoreOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
