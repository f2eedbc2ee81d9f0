//! Task orchestration: cache consultation, gated execution against
//! pooled connections, history and metrics bookkeeping.
//!
//! The executor owns nothing about the remote capability itself. It is
//! handed a [`Connector`]-backed pool and a [`TaskOperation`] and only
//! coordinates: fingerprint, cache check, concurrency gate, pooled
//! operation with a task-level timeout, then result, history, metrics.

pub mod metrics;

pub use metrics::{ExecutionMetrics, MetricsSnapshot};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CacheStats, TtlCache};
use crate::config::ExecutorConfig;
use crate::error::{Error, ExecError};
use crate::files::AsyncFileManager;
use crate::history::CircularHistoryBuffer;
use crate::pool::{ConnectionPool, Connector, PooledConnection, PoolStats};
use crate::task::{AgentRef, ExecutionResult, Task, TaskStatus};

/// Error type returned by injected operations. The original cause is
/// preserved and surfaced on the failed result.
pub type OpError = Box<dyn std::error::Error + Send + Sync>;

/// The injected remote operation: executes one task against a borrowed
/// connection.
#[async_trait]
pub trait TaskOperation<H>: Send + Sync {
    async fn run(
        &self,
        conn: &mut PooledConnection<H>,
        task: &Task,
        agent: &AgentRef,
    ) -> Result<serde_json::Value, OpError>;
}

/// How an execution ended, as recorded in the history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed,
    Failed,
    TimedOut,
}

/// One entry in the execution history ring.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub task_type: String,
    pub duration_ms: u64,
    pub outcome: RecordOutcome,
}

/// Lifecycle notifications delivered over an explicit channel to
/// whoever cares to observe.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    TaskStarted {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        duration_ms: u64,
        from_cache: bool,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
    },
    ShutdownComplete,
}

/// Shared component instances the executor coordinates. Built by the
/// caller and passed in whole — the executor holds no globals.
pub struct ExecutorDeps<H: Send + 'static> {
    pub pool: Arc<ConnectionPool<H>>,
    pub cache: Arc<TtlCache<serde_json::Value>>,
    pub history: Arc<CircularHistoryBuffer<ExecutionRecord>>,
    pub files: Arc<AsyncFileManager>,
    pub operation: Arc<dyn TaskOperation<H>>,
}

impl<H: Send + 'static> ExecutorDeps<H> {
    /// Build the standard component set from a configuration. Callers
    /// with custom instances can assemble the struct directly instead.
    pub fn new(
        config: &ExecutorConfig,
        connector: Arc<dyn Connector<H>>,
        operation: Arc<dyn TaskOperation<H>>,
    ) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(config.pool.clone(), connector)),
            cache: Arc::new(TtlCache::new(&config.cache)),
            history: Arc::new(CircularHistoryBuffer::new(config.history.capacity)),
            files: Arc::new(AsyncFileManager::new(&config.files)),
            operation,
        }
    }
}

/// Bounded-concurrency task executor. See module docs.
pub struct OptimizedExecutor<H: Send + 'static> {
    deps: ExecutorDeps<H>,
    config: ExecutorConfig,
    /// Counting semaphore bounding simultaneous in-flight operations.
    gate: Arc<Semaphore>,
    metrics: ExecutionMetrics,
    accepting: AtomicBool,
    events: Option<mpsc::Sender<ExecutorEvent>>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<H: Send + 'static> OptimizedExecutor<H> {
    /// Create an executor over the given components. Must be called
    /// within a Tokio runtime (the cache sweeper is spawned here).
    pub fn new(deps: ExecutorDeps<H>, config: ExecutorConfig) -> Self {
        let sweeper = config
            .cache
            .enabled
            .then(|| TtlCache::spawn_sweeper(&deps.cache, config.cache.sweep_interval));
        let gate = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
        Self {
            deps,
            config,
            gate,
            metrics: ExecutionMetrics::new(),
            accepting: AtomicBool::new(true),
            events: None,
            sweeper: std::sync::Mutex::new(sweeper),
        }
    }

    /// Deliver lifecycle events on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Execute one task on behalf of `agent`.
    ///
    /// Everything short of shutdown surfaces as a failed
    /// [`ExecutionResult`]: pool exhaustion, operation errors, and
    /// timeouts mark the task `Failed` (bumping `attempts`) but never
    /// propagate as `Err`. Only a rejected submission after `shutdown()`
    /// returns [`ExecError::ShuttingDown`].
    pub async fn execute_task(
        &self,
        task: &mut Task,
        agent: &AgentRef,
    ) -> Result<ExecutionResult, Error> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ExecError::ShuttingDown.into());
        }

        let started = Instant::now();

        if let Err(reason) = task.transition_to(TaskStatus::Running) {
            // Wrong starting status (e.g. already completed): report,
            // don't touch counters or history.
            return Ok(ExecutionResult {
                task_id: task.id,
                agent_id: agent.id,
                success: false,
                value: None,
                error: Some(reason),
                duration_ms: 0,
                from_cache: false,
            });
        }
        self.emit(ExecutorEvent::TaskStarted {
            task_id: task.id,
            agent_id: agent.id,
        })
        .await;

        let fingerprint = fingerprint(&task.task_type, &task.objective);

        if self.config.cache.enabled {
            if let Some(value) = self.deps.cache.get(&fingerprint) {
                self.metrics.record_cache_hit();
                let _ = task.transition_to(TaskStatus::Completed);
                let duration = started.elapsed();
                self.metrics.record_completion(duration, true);
                self.emit(ExecutorEvent::TaskCompleted {
                    task_id: task.id,
                    duration_ms: duration.as_millis() as u64,
                    from_cache: true,
                })
                .await;
                tracing::debug!(task_id = %task.id, "task served from cache");
                return Ok(ExecutionResult {
                    task_id: task.id,
                    agent_id: agent.id,
                    success: true,
                    value: Some(value),
                    error: None,
                    duration_ms: duration.as_millis() as u64,
                    from_cache: true,
                });
            }
            self.metrics.record_cache_miss();
        }

        let permit = match self.gate.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err(ExecError::ShuttingDown.into()),
        };

        // The operation runs on its own task owning both the gate permit
        // and the connection guard. A task-level timeout below abandons
        // only the join; the operation finishes on its own, the guard
        // returns the connection, and the permit frees.
        let handle = {
            let pool = Arc::clone(&self.deps.pool);
            let operation = Arc::clone(&self.deps.operation);
            let task_snapshot = task.clone();
            let agent = agent.clone();
            tokio::spawn(async move {
                let _permit = permit;
                pool.execute(|mut conn| async move {
                    operation.run(&mut conn, &task_snapshot, &agent).await
                })
                .await
            })
        };

        let joined = tokio::time::timeout(task.timeout, handle).await;
        let duration = started.elapsed();

        let failure = match joined {
            Ok(Ok(Ok(Ok(value)))) => {
                let _ = task.transition_to(TaskStatus::Completed);
                if self.config.cache.enabled {
                    self.deps.cache.set(fingerprint, value.clone());
                }
                self.deps.history.push(ExecutionRecord {
                    task_id: task.id,
                    agent_id: agent.id,
                    task_type: task.task_type.clone(),
                    duration_ms: duration.as_millis() as u64,
                    outcome: RecordOutcome::Completed,
                });
                self.metrics.record_completion(duration, true);
                self.emit(ExecutorEvent::TaskCompleted {
                    task_id: task.id,
                    duration_ms: duration.as_millis() as u64,
                    from_cache: false,
                })
                .await;
                tracing::info!(
                    task_id = %task.id,
                    duration_ms = duration.as_millis() as u64,
                    "task completed"
                );
                return Ok(ExecutionResult {
                    task_id: task.id,
                    agent_id: agent.id,
                    success: true,
                    value: Some(value),
                    error: None,
                    duration_ms: duration.as_millis() as u64,
                    from_cache: false,
                });
            }
            // Timeout: the result is discarded even if the operation
            // later succeeds; the cache is never populated from it.
            Err(_) => (
                RecordOutcome::TimedOut,
                ExecError::TaskTimeout {
                    task_id: task.id,
                    timeout: task.timeout,
                }
                .to_string(),
            ),
            Ok(Ok(Err(pool_err))) => (RecordOutcome::Failed, pool_err.to_string()),
            Ok(Ok(Ok(Err(op_err)))) => (
                RecordOutcome::Failed,
                ExecError::OperationFailed {
                    task_id: task.id,
                    reason: op_err.to_string(),
                }
                .to_string(),
            ),
            Ok(Err(join_err)) => (
                RecordOutcome::Failed,
                format!("operation aborted: {join_err}"),
            ),
        };

        let (outcome, reason) = failure;
        let _ = task.transition_to(TaskStatus::Failed);
        task.attempts += 1;
        self.deps.history.push(ExecutionRecord {
            task_id: task.id,
            agent_id: agent.id,
            task_type: task.task_type.clone(),
            duration_ms: duration.as_millis() as u64,
            outcome,
        });
        self.metrics.record_completion(duration, false);
        self.emit(ExecutorEvent::TaskFailed {
            task_id: task.id,
            error: reason.clone(),
        })
        .await;
        tracing::warn!(task_id = %task.id, error = %reason, "task failed");

        Ok(ExecutionResult {
            task_id: task.id,
            agent_id: agent.id,
            success: false,
            value: None,
            error: Some(reason),
            duration_ms: duration.as_millis() as u64,
            from_cache: false,
        })
    }

    /// Stop intake, wait for in-flight tasks, drain file operations,
    /// then drain the pool, strictly in that order, so no connection is
    /// closed while still borrowed. Idempotent.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("executor shutting down");

        // Every in-flight operation holds a gate permit until it
        // finishes, including operations whose caller timed out.
        let _ = self
            .gate
            .acquire_many(self.config.concurrency_limit.max(1) as u32)
            .await;

        if let Some(sweeper) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            sweeper.abort();
        }

        self.deps.files.wait_for_pending_operations().await;
        self.deps.pool.drain().await;

        self.emit(ExecutorEvent::ShutdownComplete).await;
        tracing::info!("executor shutdown complete");
    }

    /// Whether `execute_task` still accepts submissions.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.deps.pool.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.deps.cache.stats()
    }

    /// The last `n` execution records, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<ExecutionRecord> {
        self.deps.history.get_recent(n)
    }

    /// The file manager shared with collaborators that persist artifacts.
    pub fn files(&self) -> &Arc<AsyncFileManager> {
        &self.deps.files
    }

    async fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Stable cache key for logically identical work: the task type plus the
/// objective, trimmed, lowercased, and inner whitespace collapsed.
pub fn fingerprint(task_type: &str, objective: &str) -> String {
    let normalized = objective
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{task_type}:{normalized}")
}
