//! Demo wiring for the execution core: an echo backend driven by a small
//! sample workload, configured from environment variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;

use task_engine::config::ExecutorConfig;
use task_engine::error::PoolError;
use task_engine::executor::{ExecutorDeps, OpError, OptimizedExecutor, TaskOperation};
use task_engine::pool::{Connector, PooledConnection};
use task_engine::task::{AgentRef, Task};

/// Stand-in remote backend: each "connection" is just a label.
struct EchoConnector;

#[async_trait]
impl Connector<String> for EchoConnector {
    async fn connect(&self) -> Result<String, PoolError> {
        Ok("echo-backend".to_string())
    }
}

/// Stand-in operation: waits briefly, then echoes the objective.
struct EchoOperation {
    latency: Duration,
}

#[async_trait]
impl TaskOperation<String> for EchoOperation {
    async fn run(
        &self,
        conn: &mut PooledConnection<String>,
        task: &Task,
        agent: &AgentRef,
    ) -> Result<serde_json::Value, OpError> {
        tokio::time::sleep(self.latency).await;
        Ok(serde_json::json!({
            "backend": conn.handle,
            "agent": agent.agent_type,
            "echo": task.objective,
        }))
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = ExecutorConfig::default();
    config.concurrency_limit = env_usize("TASK_ENGINE_CONCURRENCY", config.concurrency_limit);
    config.pool.max_connections =
        env_usize("TASK_ENGINE_POOL_MAX", config.pool.max_connections);
    config.pool.min_connections =
        env_usize("TASK_ENGINE_POOL_MIN", config.pool.min_connections);
    config.cache.max_size = env_usize("TASK_ENGINE_CACHE_SIZE", config.cache.max_size);

    eprintln!("⚙ task-engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Concurrency: {}", config.concurrency_limit);
    eprintln!(
        "   Pool: {}..{} connections",
        config.pool.min_connections, config.pool.max_connections
    );

    let deps = ExecutorDeps::new(
        &config,
        Arc::new(EchoConnector),
        Arc::new(EchoOperation {
            latency: Duration::from_millis(50),
        }),
    );
    deps.pool
        .warm()
        .await
        .context("failed to warm the connection pool")?;

    let executor = Arc::new(OptimizedExecutor::new(deps, config));
    let agent = AgentRef::new("demo");

    // A workload with deliberate duplicates so the cache has something
    // to short-circuit.
    let objectives = [
        "summarize the changelog",
        "triage open issues",
        "summarize the changelog",
        "draft release notes",
        "triage open issues",
        "summarize the changelog",
    ];

    let results = join_all(objectives.iter().map(|objective| {
        let executor = Arc::clone(&executor);
        let agent = agent.clone();
        async move {
            let mut task = Task::new("demo", *objective);
            executor.execute_task(&mut task, &agent).await
        }
    }))
    .await;

    for result in results {
        let result = result.context("task rejected")?;
        tracing::info!(
            task_id = %result.task_id,
            success = result.success,
            from_cache = result.from_cache,
            duration_ms = result.duration_ms,
            "task finished"
        );
    }

    let metrics = executor.metrics();
    println!(
        "{}",
        serde_json::to_string_pretty(&metrics).context("failed to serialize metrics")?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&executor.pool_stats())
            .context("failed to serialize pool stats")?
    );

    executor.shutdown().await;
    Ok(())
}
