use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::report::BatchReport;
use crate::scheduler::SchedulerEvent;

/// 进度/报告消费者：接收调度事件
pub trait ProgressReporter: Send {
    fn name(&self) -> &str;

    fn on_batch_start(&mut self, _total: usize) {}

    fn on_event(&mut self, event: &SchedulerEvent);

    fn on_batch_end(&mut self, _report: &BatchReport) {}

    /// Called once when the orchestrator shuts down.
    fn finish(&mut self) {}
}

/// Visual progress monitor for a collection batch
///
/// One overall bar plus a spinner per running source.
pub struct ProgressMonitor {
    /// Multi-progress container
    multi: MultiProgress,
    /// Overall progress bar
    overall: ProgressBar,
    /// Per-task progress spinners
    task_bars: HashMap<String, ProgressBar>,
    /// Whether monitoring is enabled
    enabled: bool,
}

impl ProgressMonitor {
    /// Create a new progress monitor
    ///
    /// # Arguments
    ///
    /// * `total_tasks` - Initial length of the overall bar, adjusted at batch start
    /// * `enabled` - Whether to draw anything (disabled for jsonl output)
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: HashMap::new(),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));

        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} sources ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        overall.set_style(style);
        overall.set_message("Starting...");

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled: true,
        }
    }

    /// Add a task and create its progress spinner
    pub fn add_task(&mut self, task_id: &str) {
        if !self.enabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.set_message(format!("⏳ {}", task_id));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Some(old) = self.task_bars.insert(task_id.to_string(), bar) {
            old.finish_and_clear();
        }
    }

    /// Mark a task as settled
    pub fn complete_task(&mut self, task_id: &str, icon: &str, detail: &str) {
        if !self.enabled {
            return;
        }

        if let Some(bar) = self.task_bars.remove(task_id) {
            bar.finish_with_message(format!("{} {} {}", icon, task_id, detail));
        }

        self.overall.inc(1);
    }

    /// Update overall progress message
    pub fn set_message(&self, msg: &str) {
        if self.enabled {
            self.overall.set_message(msg.to_string());
        }
    }

    /// Clear all progress indicators (cleanup)
    pub fn clear(&self) {
        if self.enabled {
            self.overall.finish_and_clear();
        }
    }
}

impl ProgressReporter for ProgressMonitor {
    fn name(&self) -> &str {
        "progress"
    }

    fn on_batch_start(&mut self, total: usize) {
        if self.enabled {
            self.overall.set_length(total as u64);
            self.overall.set_position(0);
        }
    }

    fn on_event(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::TaskStarted { task } => self.add_task(&task.id),
            SchedulerEvent::TaskCompleted { task } => {
                let detail = format!("({}ms)", task.duration_ms.unwrap_or_default());
                self.complete_task(&task.id, "✅", &detail);
            }
            SchedulerEvent::TaskFailed { task } => {
                let detail = task.error.as_deref().unwrap_or("failed").to_string();
                if self.task_bars.contains_key(&task.id) {
                    self.complete_task(&task.id, "❌", &detail);
                } else if self.enabled {
                    self.overall.inc(1);
                }
            }
            SchedulerEvent::TaskCancelled { task } => {
                if self.task_bars.contains_key(&task.id) {
                    self.complete_task(&task.id, "⏹", "cancelled");
                } else if self.enabled {
                    self.overall.inc(1);
                }
            }
            SchedulerEvent::TaskRetrying { task, .. } => {
                if let Some(bar) = self.task_bars.remove(&task.id) {
                    bar.finish_and_clear();
                }
                self.set_message(&format!("retrying {} (attempt {})", task.id, task.attempts + 1));
            }
            _ => {}
        }
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        if !self.enabled {
            return;
        }
        let msg = if report.has_failures() {
            format!("❌ {} failed", report.totals.failed)
        } else {
            "✅ All sources collected".to_string()
        };
        self.overall.finish_with_message(msg);
    }

    fn finish(&mut self) {
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        // Ensure all spinners are cleaned up
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}
