use std::path::Path;

use harvest_core::config::AppConfig;
use harvest_core::error::CliError;
use harvest_core::scheduler::SchedulerSnapshot;
use serde_json::json;

use super::cli::StatusArgs;

pub fn run_status(args: StatusArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let path = args
        .state_file
        .or_else(|| cfg.scheduler.state_file.clone())
        .ok_or_else(|| {
            CliError::Config("no state file: pass --state-file or set scheduler.state_file".into())
        })?;

    let Some(snapshot) = SchedulerSnapshot::load_from_file(&path)? else {
        println!("no saved state at {}", path.display());
        return Ok(0);
    };

    if args.json {
        println!("{}", summary_json(&path, &snapshot));
    } else {
        println!("{}", summary_text(&path, &snapshot));
    }
    Ok(0)
}

fn summary_json(path: &Path, snapshot: &SchedulerSnapshot) -> serde_json::Value {
    json!({
        "path": path.display().to_string(),
        "snapshot_id": snapshot.snapshot_id,
        "saved_at": snapshot.saved_at.to_rfc3339(),
        "pending": snapshot.queue.len(),
        "running": snapshot.running.len(),
        "completed": snapshot.completed.len(),
        "failed": snapshot.failed.len(),
        "cancelled": snapshot.cancelled.len(),
        "metrics": snapshot.metrics,
    })
}

fn summary_text(path: &Path, snapshot: &SchedulerSnapshot) -> String {
    let mut out = format!(
        "{} (saved {})\n  pending:   {}\n  running:   {}\n  completed: {}\n  failed:    {}\n  cancelled: {}",
        path.display(),
        snapshot.saved_at.to_rfc3339(),
        snapshot.queue.len(),
        snapshot.running.len(),
        snapshot.completed.len(),
        snapshot.failed.len(),
        snapshot.cancelled.len(),
    );
    for task in &snapshot.failed {
        out.push_str(&format!(
            "\n  ! {}: {}",
            task.id,
            task.error.as_deref().unwrap_or("unknown error")
        ));
    }
    out
}
