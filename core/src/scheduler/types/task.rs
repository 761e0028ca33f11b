use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::traits::TaskExecutor;

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for a slot or for its dependencies.
    Pending,
    /// Executor in flight.
    Running,
    /// Failed an attempt and is about to be re-queued.
    Retrying,
    /// Executor resolved without a cancellation request.
    Completed,
    /// Retry budget exhausted, fatal error, or a dependency failed.
    Failed,
    /// Cancellation was requested before or during execution.
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a task: everything except its executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Per-task override of the scheduler-wide retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            result: None,
            error: None,
        }
    }

    /// Moves the record to `status` and stamps `updated_at`.
    pub fn transition_to(&mut self, status: TaskStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        match status {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            TaskStatus::Pending | TaskStatus::Retrying => {}
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Everything needed to admit a task into the scheduler.
#[derive(Clone)]
pub struct TaskSpec {
    pub id: String,
    pub task_type: String,
    pub dependencies: Vec<String>,
    pub max_retries: Option<u32>,
    pub executor: Arc<dyn TaskExecutor>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            dependencies: Vec::new(),
            max_retries: None,
            executor,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("dependencies", &self.dependencies)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
