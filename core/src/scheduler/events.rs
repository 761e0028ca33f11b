use std::path::PathBuf;

use serde::Serialize;

use super::types::TaskRecord;

/// Lifecycle notifications broadcast by the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskAdded {
        task: TaskRecord,
    },
    TaskStarted {
        task: TaskRecord,
    },
    TaskCompleted {
        task: TaskRecord,
    },
    TaskFailed {
        task: TaskRecord,
    },
    TaskRetrying {
        task: TaskRecord,
        delay_ms: u64,
    },
    TaskCancelled {
        task: TaskRecord,
    },
    StateLoaded {
        path: PathBuf,
        pending: usize,
        completed: usize,
        failed: usize,
    },
    StateLoadError {
        path: PathBuf,
        error: String,
    },
    StateSaved {
        path: PathBuf,
    },
    StateSaveError {
        path: PathBuf,
        error: String,
    },
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskAdded { .. } => "task_added",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetrying { .. } => "task_retrying",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::StateLoaded { .. } => "state_loaded",
            Self::StateLoadError { .. } => "state_load_error",
            Self::StateSaved { .. } => "state_saved",
            Self::StateSaveError { .. } => "state_save_error",
        }
    }

    /// The task snapshot carried by task lifecycle events.
    pub fn task(&self) -> Option<&TaskRecord> {
        match self {
            Self::TaskAdded { task }
            | Self::TaskStarted { task }
            | Self::TaskCompleted { task }
            | Self::TaskFailed { task }
            | Self::TaskRetrying { task, .. }
            | Self::TaskCancelled { task } => Some(task),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_name() {
        let event = SchedulerEvent::TaskRetrying {
            task: TaskRecord::new("a", "blog"),
            delay_ms: 0,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
        assert_eq!(value["task"]["id"], "a");
        assert_eq!(event.task().map(|t| t.id.as_str()), Some("a"));
    }
}
