//! Task descriptors and execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Priority of a task. Carried on the descriptor for callers and
/// observers; the executor itself schedules FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be executed.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or timeout.
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// `Failed → Running` is permitted so callers can route a failed task
    /// back in for another attempt.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Failed, Running)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Reference to the agent a task executes on behalf of.
///
/// Carried through the executor and stamped onto results and history
/// records; never owned or mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: Uuid,
    pub agent_type: String,
}

impl AgentRef {
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
        }
    }
}

/// A unit of work submitted to the executor.
///
/// Created by callers; mutated only by the executor (status, timestamps,
/// attempt count). Retention is the caller's concern.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    /// Unique task ID.
    pub id: Uuid,
    /// Parent task, if this task was spawned by another.
    pub parent_id: Option<Uuid>,
    /// Logical type, e.g. `"analyze"` or `"summarize"`. Part of the
    /// cache fingerprint.
    pub task_type: String,
    /// What the task should accomplish. Part of the cache fingerprint.
    pub objective: String,
    /// Scheduling hint for callers and observers.
    pub priority: TaskPriority,
    /// Tasks that must complete before this one is submitted. The
    /// executor does not enforce ordering; the list is caller metadata.
    pub depends_on: Vec<Uuid>,
    /// Wall-clock bound on a single execution attempt.
    #[serde(skip)]
    pub timeout: Duration,
    /// Retry ceiling consulted by the caller when resubmitting.
    pub max_retries: u32,
    /// Failed attempts so far; incremented by the executor.
    pub attempts: u32,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque caller metadata.
    pub metadata: serde_json::Value,
}

impl Task {
    /// Create a pending task with default timeout and retry settings.
    pub fn new(task_type: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            task_type: task_type.into(),
            objective: objective.into(),
            priority: TaskPriority::Normal,
            depends_on: Vec::new(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            attempts: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<Uuid>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Transition to a new status, updating timestamps.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "Cannot transition task {} from {} to {}",
                self.id, self.status, target
            ));
        }

        self.status = target;
        match target {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed => self.completed_at = Some(Utc::now()),
            TaskStatus::Pending => {}
        }
        Ok(())
    }

    /// Whether the caller's retry budget allows another attempt.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Duration of the last attempt, if one has started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            let elapsed = end.signed_duration_since(start);
            Duration::from_millis(elapsed.num_milliseconds().max(0) as u64)
        })
    }
}

/// Outcome of one `execute_task` call, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub success: bool,
    /// Operation output on success.
    pub value: Option<serde_json::Value>,
    /// Failure description on error or timeout.
    pub error: Option<String>,
    pub duration_ms: u64,
    /// True when the value was served from the result cache.
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_valid() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn status_transitions_invalid() {
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn task_transitions_update_timestamps() {
        let mut task = Task::new("analyze", "summarize the report");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());

        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());

        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut task = Task::new("analyze", "x");
        let err = task.transition_to(TaskStatus::Completed).unwrap_err();
        assert!(err.contains("pending"));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn failed_task_can_rerun() {
        let mut task = Task::new("analyze", "x");
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Failed).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn builder_settings_apply() {
        let parent = Uuid::new_v4();
        let task = Task::new("fetch", "get data")
            .with_priority(TaskPriority::Critical)
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(1)
            .with_parent(parent)
            .with_metadata(serde_json::json!({"source": "unit"}));

        assert_eq!(task.priority, TaskPriority::Critical);
        assert_eq!(task.timeout, Duration::from_secs(5));
        assert_eq!(task.max_retries, 1);
        assert_eq!(task.parent_id, Some(parent));
        assert_eq!(task.metadata["source"], "unit");
    }

    #[test]
    fn retry_budget() {
        let mut task = Task::new("fetch", "x").with_max_retries(2);
        assert!(task.can_retry());
        task.attempts = 2;
        assert!(!task.can_retry());
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::Running);
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }
}
