use std::sync::Arc;

use harvest_core::config::AppConfig;
use harvest_core::error::CliError;
use harvest_core::events_out::{start_events_out, write_scheduler_event, EventsOutTx};
use harvest_core::orchestrator::Orchestrator;
use harvest_core::scheduler::{Scheduler, SchedulerEvent};
use harvest_plugins::{build_reporter, build_retry_strategy, DefaultCollectorFactory, JsonlReporter};

use super::cli::{CollectArgs, OutputFormat};

/// Exit code when the batch ran but at least one source failed.
pub const EXIT_SOME_FAILED: i32 = 2;

pub async fn run_collect(args: CollectArgs, mut cfg: AppConfig) -> Result<i32, CliError> {
    if let Some(n) = args.max_concurrent {
        cfg.scheduler.max_concurrent = n;
    }
    if let Some(path) = args.state_file.clone() {
        cfg.scheduler.state_file = Some(path);
    }
    cfg.validate().map_err(|e| CliError::Config(format!("{e:#}")))?;

    if args.fresh {
        if let Some(path) = cfg.scheduler.state_file.as_deref() {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::info!(path = %path.display(), "discarded saved state"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CliError::Io(e)),
            }
        }
    }

    let mut events_cfg = cfg.events_out.clone();
    if args.format == OutputFormat::Jsonl && !events_cfg.enabled {
        events_cfg.enabled = true;
        events_cfg.path = "stdout:".to_string();
    }
    let (events_tx, events_handle) = match start_events_out(&events_cfg)
        .await
        .map_err(CliError::Command)?
    {
        Some((tx, handle)) => (Some(tx), Some(handle)),
        None => (None, None),
    };

    let retry = build_retry_strategy(&cfg.retry).map_err(|e| CliError::Config(e.to_string()))?;
    let builder = Scheduler::builder(cfg.scheduler.clone()).retry_strategy(retry);
    let mut load_rx = builder.subscribe();
    let scheduler = builder.build();
    while let Ok(event) = load_rx.try_recv() {
        log_load_event(&event);
        write_scheduler_event(events_tx.as_ref(), &event).await;
    }
    drop(load_rx);

    let interactive = atty::is(atty::Stream::Stderr);
    let format = match args.format {
        OutputFormat::Progress if !(interactive && cfg.orchestrator.progress) => OutputFormat::Text,
        other => other,
    };

    let mut builder = Orchestrator::builder(scheduler)
        .app_config(&cfg)
        .factory(Arc::new(DefaultCollectorFactory));
    if let Some(reporter) = build_reporter(format.as_str(), events_tx.clone(), interactive)
        .map_err(|e| CliError::Command(e.to_string()))?
    {
        builder = builder.reporter(reporter);
    }
    if format != OutputFormat::Jsonl {
        if let Some(tx) = events_tx.clone() {
            builder = builder.reporter(Box::new(JsonlReporter::new(tx)));
        }
    }
    let orchestrator = Arc::new(builder.build());
    orchestrator.initialize()?;

    let signal_task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; cancelling remaining sources");
                orchestrator.cancel_all();
            }
        })
    };

    let result = orchestrator.collect_all(&args.sources, &args.output).await;

    signal_task.abort();
    let _ = signal_task.await;
    orchestrator.shutdown();
    drop(orchestrator);
    close_events_out(events_tx, events_handle).await;

    let report = result?;
    if format != OutputFormat::Jsonl {
        let json = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
        println!("{json}");
    }

    tracing::info!(
        total = report.totals.total,
        successful = report.totals.successful,
        failed = report.totals.failed,
        skipped = report.totals.skipped,
        "batch finished"
    );

    Ok(if report.has_failures() {
        EXIT_SOME_FAILED
    } else {
        0
    })
}

fn log_load_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::StateLoaded {
            path,
            pending,
            completed,
            failed,
        } => tracing::info!(
            path = %path.display(),
            pending,
            completed,
            failed,
            "resuming from saved state"
        ),
        SchedulerEvent::StateLoadError { path, error } => {
            tracing::warn!(path = %path.display(), %error, "saved state ignored")
        }
        other => tracing::debug!(event = other.name(), "scheduler event at startup"),
    }
}

async fn close_events_out(
    tx: Option<EventsOutTx>,
    handle: Option<tokio::task::JoinHandle<()>>,
) {
    drop(tx);
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            tracing::warn!("events_out writer ended abnormally: {e}");
        }
    }
}
