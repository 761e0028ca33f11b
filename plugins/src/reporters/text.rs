use std::io::Write;

use harvest_core::orchestrator::{BatchReport, ProgressReporter};
use harvest_core::scheduler::SchedulerEvent;

/// One plain line per lifecycle event, for logs and dumb terminals.
pub struct TextReporter {
    ascii_only: bool,
    out: Box<dyn Write + Send>,
}

impl TextReporter {
    pub fn new(ascii_only: bool) -> Self {
        Self::with_writer(ascii_only, Box::new(std::io::stdout()))
    }

    pub fn with_writer(ascii_only: bool, out: Box<dyn Write + Send>) -> Self {
        Self { ascii_only, out }
    }

    fn format_event(&self, event: &SchedulerEvent) -> Option<String> {
        let line = match event {
            // Queue admissions are noise at this level.
            SchedulerEvent::TaskAdded { .. } | SchedulerEvent::StateSaved { .. } => return None,
            SchedulerEvent::TaskStarted { task } => format!(
                "TASK START {} (type {}, attempt {})",
                task.id,
                task.task_type,
                task.attempts + 1
            ),
            SchedulerEvent::TaskCompleted { task } => format!(
                "TASK END {} (status {}, duration {}ms, attempts {})",
                task.id,
                if self.ascii_only { "OK" } else { "SUCCESS" },
                task.duration_ms.unwrap_or_default(),
                task.attempts
            ),
            SchedulerEvent::TaskFailed { task } => format!(
                "TASK END {} (status {}, attempts {}): {}",
                task.id,
                if self.ascii_only { "FAIL" } else { "FAILED" },
                task.attempts,
                task.error.as_deref().unwrap_or("unknown error")
            ),
            SchedulerEvent::TaskRetrying { task, delay_ms } => {
                let mut line = format!("TASK RETRY {} (attempt {} failed", task.id, task.attempts);
                if *delay_ms > 0 {
                    line.push_str(&format!(", next in {}ms", delay_ms));
                }
                line.push(')');
                if let Some(err) = &task.error {
                    line.push_str(&format!(": {}", err));
                }
                line
            }
            SchedulerEvent::TaskCancelled { task } => {
                let mut line = format!("TASK CANCELLED {}", task.id);
                if let Some(err) = &task.error {
                    line.push_str(&format!(": {}", err));
                }
                line
            }
            SchedulerEvent::StateLoaded {
                path,
                pending,
                completed,
                failed,
            } => format!(
                "STATE LOADED {} (pending {}, completed {}, failed {})",
                path.display(),
                pending,
                completed,
                failed
            ),
            SchedulerEvent::StateLoadError { path, error } => {
                format!("STATE LOAD ERROR {}: {}", path.display(), error)
            }
            SchedulerEvent::StateSaveError { path, error } => {
                format!("STATE SAVE ERROR {}: {}", path.display(), error)
            }
        };
        Some(line)
    }

    fn format_report(&self, report: &BatchReport) -> String {
        let mut out = format!(
            "BATCH END (total {}, successful {}, failed {}, skipped {}, success rate {}%, duration {})",
            report.totals.total,
            report.totals.successful,
            report.totals.failed,
            report.totals.skipped,
            report.totals.success_rate,
            report.duration.human
        );
        for outcome in &report.failed {
            out.push_str(&format!(
                "\n  failed {} ({}): {}",
                outcome.id,
                outcome.source_type,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
        out
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            tracing::debug!(error = %e, "text reporter write failed");
        }
    }
}

impl ProgressReporter for TextReporter {
    fn name(&self) -> &str {
        "text"
    }

    fn on_batch_start(&mut self, total: usize) {
        self.write_line(&format!("BATCH START ({} sources)", total));
    }

    fn on_event(&mut self, event: &SchedulerEvent) {
        if let Some(line) = self.format_event(event) {
            self.write_line(&line);
        }
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        let text = self.format_report(report);
        self.write_line(&text);
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}
