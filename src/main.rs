use std::sync::Arc;

use agent_pool::agent::AgentDefinition;
use agent_pool::config::{ExecutorConfig, PoolConfig};
use agent_pool::llm::{LlmConfig, create_provider};
use agent_pool::pool::AgentPool;
use agent_pool::store::{LibSqlTaskStore, TaskStore};
use agent_pool::task::{Priority, TaskContext};
use agent_pool::tools::ToolRegistry;
use agent_pool::tools::builtin::register_builtin_tools;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
when they help answer the request, then reply with a concise final answer.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: agent-pool <prompt>");
        std::process::exit(2);
    }

    let pool_config = PoolConfig::from_env()?;
    let executor_config = ExecutorConfig::from_env()?;

    let llm_config = LlmConfig::from_env(executor_config.model.clone()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });
    let llm = create_provider(&llm_config);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("AGENT_POOL_DB_PATH").unwrap_or_else(|_| "./data/agent-pool.db".to_string());
    let store: Arc<dyn TaskStore> = Arc::new(
        LibSqlTaskStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    eprintln!("🤖 Agent Pool v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", executor_config.model);
    eprintln!("   Database: {}", db_path);
    eprintln!(
        "   Concurrency: {} (queue {})",
        pool_config.max_concurrent_tasks, pool_config.max_queue_size
    );

    // ── Agents ───────────────────────────────────────────────────────────
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools)?;
    eprintln!("   Tools: {}\n", tools.list().join(", "));

    let system_prompt = std::env::var("AGENT_POOL_SYSTEM_PROMPT")
        .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

    let pool = AgentPool::new(pool_config, llm, store);
    pool.register_agent(
        AgentDefinition::new("assistant", system_prompt, Arc::new(tools))
            .with_description("General-purpose assistant")
            .with_config(executor_config),
    )
    .await?;

    let mut events = pool.subscribe();
    let task_id = pool
        .submit_task("assistant", prompt, TaskContext::new(), Priority::Medium)
        .await?;

    // Stream lifecycle events until the task settles.
    loop {
        match events.recv().await {
            Ok(event) => {
                if event.task_id() != Some(task_id) {
                    continue;
                }
                eprintln!("   [{}] {}", event.event_type(), serde_json::to_string(&event)?);
                if event.is_terminal() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    pool.flush_store().await;
    if let Some(task) = pool.get_task(task_id).await {
        println!("{}", serde_json::to_string_pretty(&task)?);
    }

    Ok(())
}
