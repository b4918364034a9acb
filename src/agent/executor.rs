//! Agent executor: drives one task through the tool-use loop.
//!
//! Every step lands in the task's checkpoint log before the executor moves
//! on. Each await on the reasoning provider or a tool handler races the
//! task's cancellation token and the optional deadline, so cancelling drops
//! the in-flight future.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentDefinition;
use crate::error::{ExecutorError, ToolError};
use crate::llm::{
    ChatMessage, LlmProvider, Reasoning, RespondResult, TokenUsage, ToolCall, ToolResult,
};
use crate::pool::PoolEvent;
use crate::task::{
    CheckpointState, Task, TaskContext, TaskResult, ToolCallOutput, ToolCallRecord,
};

/// Why the loop stopped without a result.
#[derive(Debug)]
enum Stop {
    Cancelled,
    TimedOut(Duration),
    Failed(String),
}

struct ActiveRun {
    task_id: Uuid,
    token: CancellationToken,
}

/// Clears the active-run slot when the execution ends, even by panic.
struct RunGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Snapshot returned by [`Executor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorStatus {
    pub agent: String,
    pub running: bool,
    pub task_id: Option<Uuid>,
}

/// Runs one task at a time for one agent type.
pub struct Executor {
    definition: Arc<AgentDefinition>,
    llm: Arc<dyn LlmProvider>,
    events: Option<broadcast::Sender<PoolEvent>>,
    progress: Option<watch::Sender<Task>>,
    active: Mutex<Option<ActiveRun>>,
}

impl Executor {
    pub fn new(definition: Arc<AgentDefinition>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            definition,
            llm,
            events: None,
            progress: None,
            active: Mutex::new(None),
        }
    }

    /// Emit checkpoint and tool events on the given channel.
    pub fn with_events(mut self, events: broadcast::Sender<PoolEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Publish a task snapshot after every checkpoint and status change.
    pub fn with_progress(mut self, progress: watch::Sender<Task>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn status(&self) -> ExecutorStatus {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        ExecutorStatus {
            agent: self.definition.name.clone(),
            running: active.is_some(),
            task_id: active.as_ref().map(|a| a.task_id),
        }
    }

    /// Cancel the running task, if any. Calling it again is a no-op.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = active.as_ref() {
            tracing::info!(task_id = %run.task_id, agent = %self.definition.name, "Cancelling task");
            run.token.cancel();
        }
    }

    /// Run `task` to a terminal state.
    pub async fn execute(&self, task: Task) -> Result<Task, ExecutorError> {
        self.execute_with_cancel(task, CancellationToken::new())
            .await
    }

    /// Run `task` to a terminal state, stopping early once `token` fires.
    pub async fn execute_with_cancel(
        &self,
        mut task: Task,
        token: CancellationToken,
    ) -> Result<Task, ExecutorError> {
        let _guard = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(run) = active.as_ref() {
                return Err(ExecutorError::AlreadyRunning {
                    agent: self.definition.name.clone(),
                    task_id: run.task_id,
                });
            }
            *active = Some(ActiveRun {
                task_id: task.id,
                token: token.clone(),
            });
            RunGuard { slot: &self.active }
        };

        let task_id = task.id;
        let abort = |e: crate::error::TaskError| ExecutorError::Aborted {
            task_id,
            reason: e.to_string(),
        };

        task.start().map_err(abort)?;
        self.publish(&task);

        tracing::info!(
            task_id = %task.id,
            agent = %self.definition.name,
            attempt = task.retry_count + 1,
            "Executing task"
        );

        let deadline = self.definition.config.timeout.map(|d| Instant::now() + d);

        match self.run_loop(&mut task, &token, deadline).await {
            Ok(result) => {
                tracing::info!(
                    task_id = %task.id,
                    iterations = result.iterations,
                    degraded = result.degraded,
                    tokens = result.usage.total(),
                    elapsed_ms = task.elapsed().unwrap_or_default().as_millis() as u64,
                    "Task completed"
                );
                task.complete(result).map_err(abort)?;
            }
            Err(Stop::Cancelled) => {
                tracing::info!(task_id = %task.id, "Task cancelled");
                self.record(&mut task, CheckpointState::Error, "Task cancelled", vec![]);
                task.cancel().map_err(abort)?;
            }
            Err(Stop::TimedOut(limit)) => {
                let reason = format!("Task timed out after {}s", limit.as_secs_f64());
                tracing::warn!(task_id = %task.id, "{}", reason);
                self.record(&mut task, CheckpointState::Error, &reason, vec![]);
                task.fail(reason).map_err(abort)?;
            }
            Err(Stop::Failed(reason)) => {
                tracing::warn!(task_id = %task.id, error = %reason, "Task failed");
                self.record(&mut task, CheckpointState::Error, &reason, vec![]);
                task.fail(reason).map_err(abort)?;
            }
        }

        self.publish(&task);
        Ok(task)
    }

    async fn run_loop(
        &self,
        task: &mut Task,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<TaskResult, Stop> {
        let config = &self.definition.config;
        let reasoning = Reasoning::new(self.llm.clone(), config)
            .with_system_prompt(self.definition.system_prompt.clone());
        let tool_defs = self.definition.tools.tool_definitions();

        let mut messages = vec![ChatMessage::user(task.input.clone())];
        let mut iterations = 0u32;
        let mut usage = TokenUsage::default();
        let mut last_text: Option<String> = None;

        let opening = format!("Starting task: {}", task.input);
        self.record(task, CheckpointState::Thinking, opening, vec![]);

        loop {
            let output = self
                .race(
                    token,
                    deadline,
                    reasoning.respond_with_tools(&messages, &tool_defs),
                )
                .await?
                .map_err(|e| Stop::Failed(format!("Reasoning call failed: {e}")))?;
            usage += output.usage;

            let (tool_calls, content) = match output.result {
                RespondResult::Text(text) => {
                    self.record(task, CheckpointState::Result, text.clone(), vec![]);
                    return Ok(TaskResult {
                        text,
                        iterations,
                        usage,
                        degraded: false,
                    });
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => (tool_calls, content),
            };

            if let Some(text) = &content {
                last_text = Some(text.clone());
            }

            tracing::debug!(
                task_id = %task.id,
                iteration = iterations + 1,
                calls = tool_calls.len(),
                "Reasoning requested tools"
            );

            let records = tool_calls
                .iter()
                .map(|c| ToolCallRecord::pending(c.id.clone(), c.name.clone(), c.arguments.clone()))
                .collect();
            let checkpoint_id = self.record(
                task,
                CheckpointState::ToolUse,
                format!("Using {} tool(s)", tool_calls.len()),
                records,
            );

            let results = self
                .run_tools(task, checkpoint_id, &tool_calls, token, deadline)
                .await?;

            messages.push(ChatMessage::assistant_with_tool_calls(content, tool_calls));
            messages.push(ChatMessage::tool_results(results));
            iterations += 1;

            if iterations >= config.max_iterations {
                tracing::warn!(
                    task_id = %task.id,
                    max_iterations = config.max_iterations,
                    "Iteration cap reached, forcing completion"
                );
                let text = last_text.unwrap_or_else(|| {
                    format!(
                        "Reached maximum iterations ({}) without a final answer",
                        config.max_iterations
                    )
                });
                self.record(task, CheckpointState::Result, text.clone(), vec![]);
                return Ok(TaskResult {
                    text,
                    iterations,
                    usage,
                    degraded: true,
                });
            }
        }
    }

    /// Run one batch of tool calls and attach every output to its record.
    async fn run_tools(
        &self,
        task: &mut Task,
        checkpoint_id: Uuid,
        calls: &[ToolCall],
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Vec<ToolResult>, Stop> {
        let ctx = task.context.clone();
        let mut results = Vec::with_capacity(calls.len());

        if self.definition.config.parallel_tools && calls.len() > 1 {
            let outputs = self
                .race(
                    token,
                    deadline,
                    join_all(calls.iter().map(|call| self.invoke(call, &ctx))),
                )
                .await?;
            for (index, (call, output)) in calls.iter().zip(outputs).enumerate() {
                results.push(self.settle(task, checkpoint_id, index, call, output));
            }
        } else {
            for (index, call) in calls.iter().enumerate() {
                let output = self.race(token, deadline, self.invoke(call, &ctx)).await?;
                results.push(self.settle(task, checkpoint_id, index, call, output));
            }
        }

        Ok(results)
    }

    /// Resolve, validate and run a single call. Failures become error outputs.
    async fn invoke(&self, call: &ToolCall, ctx: &TaskContext) -> ToolCallOutput {
        let Some(tool) = self.definition.tools.get(&call.name) else {
            return ToolCallOutput::from(&ToolError::NotFound {
                name: call.name.clone(),
            });
        };

        if let Err(reason) = tool.contract().validate(&call.arguments) {
            return ToolCallOutput::from(&ToolError::InvalidParameters {
                name: call.name.clone(),
                reason,
            });
        }

        let timeout = tool.execution_timeout();
        let start = std::time::Instant::now();
        // A panicking handler is contained to its own call.
        let handler = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|panic| {
                    Err(ToolError::ExecutionFailed {
                        name: call.name.clone(),
                        reason: format!("handler panicked: {}", panic_message(panic.as_ref())),
                    })
                })
            });
        let result = tokio::time::timeout(timeout, handler).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                tracing::debug!(
                    tool = %call.name,
                    elapsed_ms,
                    reported_ms = output.duration.as_millis() as u64,
                    "Tool call succeeded"
                );
                ToolCallOutput::Success {
                    value: output.result,
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(tool = %call.name, elapsed_ms, error = %e, "Tool call failed");
                ToolCallOutput::from(&e)
            }
            Err(_) => {
                tracing::debug!(tool = %call.name, elapsed_ms, "Tool call timed out");
                ToolCallOutput::from(&ToolError::Timeout {
                    name: call.name.clone(),
                    timeout,
                })
            }
        }
    }

    /// Attach an output, emit its event, and build the result turn entry.
    fn settle(
        &self,
        task: &mut Task,
        checkpoint_id: Uuid,
        index: usize,
        call: &ToolCall,
        output: ToolCallOutput,
    ) -> ToolResult {
        let result = ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: output.to_llm_content(),
            is_error: output.is_error(),
        };

        match &output {
            ToolCallOutput::Success { .. } => self.emit(PoolEvent::ToolExecuted {
                task_id: task.id,
                tool_name: call.name.clone(),
                summary: result.content.chars().take(200).collect(),
            }),
            ToolCallOutput::Error { kind, message } => {
                tracing::warn!(task_id = %task.id, tool = %call.name, error = %message, "Tool call failed");
                self.emit(PoolEvent::ToolError {
                    task_id: task.id,
                    tool_name: call.name.clone(),
                    kind: *kind,
                    error: message.clone(),
                });
            }
        }

        if let Err(e) = task.attach_tool_output(checkpoint_id, index, output) {
            tracing::error!(task_id = %task.id, error = %e, "Failed to attach tool output");
        }
        self.publish(task);
        result
    }

    async fn race<F: Future>(
        &self,
        token: &CancellationToken,
        deadline: Option<Instant>,
        fut: F,
    ) -> Result<F::Output, Stop> {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Stop::Cancelled),
            _ = expired => Err(Stop::TimedOut(self.definition.config.timeout.unwrap_or_default())),
            out = fut => Ok(out),
        }
    }

    fn record(
        &self,
        task: &mut Task,
        state: CheckpointState,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Uuid {
        let checkpoint_id = task.checkpoint(state, content, tool_calls);
        self.emit(PoolEvent::CheckpointCreated {
            task_id: task.id,
            checkpoint_id,
            state,
        });
        self.publish(task);
        checkpoint_id
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn publish(&self, task: &Task) {
        if let Some(tx) = &self.progress {
            tx.send_replace(task.clone());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
