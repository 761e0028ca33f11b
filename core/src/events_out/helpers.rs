use chrono::Utc;
use serde::Serialize;

use crate::events_out::EventsOutTx;
use crate::scheduler::SchedulerEvent;

#[derive(Serialize)]
struct EventLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a SchedulerEvent,
}

/// Serializes a scheduler event as one JSON line, stamped with the current time.
pub fn event_line(ev: &SchedulerEvent) -> Option<String> {
    serde_json::to_string(&EventLine {
        ts: Utc::now().to_rfc3339(),
        event: ev,
    })
    .ok()
}

pub async fn write_scheduler_event(out: Option<&EventsOutTx>, ev: &SchedulerEvent) {
    let Some(out) = out else {
        return;
    };
    if let Some(line) = event_line(ev) {
        out.send_line(line).await;
    }
}
