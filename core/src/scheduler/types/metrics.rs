use serde::{Deserialize, Serialize};

/// Cumulative counters kept across the life of a scheduler (until `flush`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_cancelled: u64,
    /// Running mean of start-to-settle durations of successful tasks.
    pub average_duration_ms: f64,
}

impl SchedulerMetrics {
    /// Folds one successful duration into the running mean.
    ///
    /// Must be called after `tasks_completed` has been incremented.
    pub fn record_duration(&mut self, duration_ms: u64) {
        let n = self.tasks_completed.max(1) as f64;
        self.average_duration_ms += (duration_ms as f64 - self.average_duration_ms) / n;
    }
}

/// Point-in-time counts returned by `Scheduler::stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub metrics: SchedulerMetrics,
}
