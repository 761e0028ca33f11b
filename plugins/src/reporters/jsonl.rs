use chrono::Utc;
use harvest_core::events_out::{event_line, EventsOutTx};
use harvest_core::orchestrator::{BatchReport, ProgressReporter};
use harvest_core::scheduler::SchedulerEvent;
use serde_json::json;

/// Mirrors scheduler events and the final report into the events_out sink.
pub struct JsonlReporter {
    out: EventsOutTx,
}

impl JsonlReporter {
    pub fn new(out: EventsOutTx) -> Self {
        Self { out }
    }
}

impl ProgressReporter for JsonlReporter {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn on_batch_start(&mut self, total: usize) {
        let line = json!({
            "ts": Utc::now().to_rfc3339(),
            "event": "batch_started",
            "total": total,
        });
        self.out.try_send_line(line.to_string());
    }

    fn on_event(&mut self, event: &SchedulerEvent) {
        if let Some(line) = event_line(event) {
            self.out.try_send_line(line);
        }
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        let line = json!({
            "ts": Utc::now().to_rfc3339(),
            "event": "batch_finished",
            "report": report,
        });
        self.out.try_send_line(line.to_string());
    }

    fn finish(&mut self) {
        let dropped = self.out.dropped_count();
        if dropped > 0 {
            tracing::warn!(dropped, "jsonl reporter dropped event lines");
        }
    }
}
