//! Error types for the task execution core.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the execution core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),
}

/// Connection pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("No connection became available within {waited:?}")]
    AcquireTimeout { waited: Duration },

    #[error("Pool is draining; new acquisitions are rejected")]
    Drained,

    #[error("Failed to open connection: {reason}")]
    Connect { reason: String },
}

/// Task execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Task {task_id} timed out after {timeout:?}")]
    TaskTimeout { task_id: Uuid, timeout: Duration },

    #[error("Task {task_id} failed: {reason}")]
    OperationFailed { task_id: Uuid, reason: String },

    #[error("Executor is shutting down; task rejected")]
    ShuttingDown,
}

/// Result type alias for the execution core.
pub type Result<T> = std::result::Result<T, Error>;
