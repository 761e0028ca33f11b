use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler knobs, read from the `[scheduler]` config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on tasks in the running state.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retry budget applied when a task carries no override.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Snapshot location. Persistence is disabled when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Periodic snapshot interval; 0 disables the timer.
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,

    /// Fail queued dependents of a failed or cancelled task instead of
    /// leaving them pending forever.
    #[serde(default = "default_cascade_failures")]
    pub cascade_failures: bool,

    /// Optional per-attempt timeout enforced by the scheduler.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_persist_interval_ms() -> u64 {
    30_000
}

fn default_cascade_failures() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            state_file: None,
            persist_interval_ms: default_persist_interval_ms(),
            cascade_failures: default_cascade_failures(),
            task_timeout_ms: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl SchedulerConfig {
    pub fn persist_interval(&self) -> Option<Duration> {
        (self.persist_interval_ms > 0).then(|| Duration::from_millis(self.persist_interval_ms))
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
