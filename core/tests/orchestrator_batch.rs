mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use harvest_core::config::CollectorConfig;
use harvest_core::orchestrator::{Collector, Orchestrator, Source, SourceType};
use harvest_core::scheduler::{
    Scheduler, SchedulerConfig, SchedulerSnapshot, TaskRecord, TaskStatus,
};
use harvest_core::OrchestratorError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn write_sources(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn unregistered_type_fails_only_its_source() {
    let dir = TempDir::new().unwrap();
    let sources = write_sources(
        dir.path(),
        "sources.json",
        r#"[
            {"id": "post-1", "type": "blog", "url": "https://example.com/1"},
            {"id": "post-2", "url": "https://example.com/2"},
            {"id": "paper", "type": "pdf", "path": "paper.pdf"},
            {"id": "episode", "type": "podcast", "url": "https://example.com/ep"},
            {"id": "letter", "type": "newsletter", "url": "https://example.com/nl"}
        ]"#,
    );

    let stub = Arc::new(StubCollector::default());
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(2)))
        .collector(SourceType::Blog, stub.clone())
        .collector(SourceType::Pdf, stub.clone())
        .collector(SourceType::Podcast, stub.clone())
        .build();
    orchestrator.initialize().unwrap();

    let report = orchestrator
        .collect_all(&sources, &dir.path().join("out"))
        .await
        .unwrap();

    assert_eq!(report.totals.total, 5);
    assert_eq!(report.totals.successful, 4);
    assert_eq!(report.totals.failed, 1);
    assert_eq!(report.totals.skipped, 0);
    assert_eq!(report.totals.success_rate, "80.0");

    let failed = &report.failed[0];
    assert_eq!(failed.id, "letter");
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.error.as_deref(),
        Some("no collector registered for source type 'newsletter'")
    );

    assert_eq!(report.by_type["blog"].successful, 2);
    assert_eq!(report.by_type["newsletter"].failed, 1);
    assert_eq!(stub.calls().len(), 4);
    assert!(dir.path().join("out").is_dir());
}

#[tokio::test]
async fn collect_before_initialize_is_an_error() {
    let dir = TempDir::new().unwrap();
    let sources = write_sources(dir.path(), "sources.json", "[]");
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1))).build();

    let err = orchestrator
        .collect_all(&sources, dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotInitialized));
}

#[tokio::test]
async fn missing_source_list_is_an_error() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1))).build();
    orchestrator.initialize().unwrap();

    let err = orchestrator
        .collect_all(&dir.path().join("nope.json"), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SourceList { .. }));
}

#[tokio::test]
async fn empty_source_list_reports_zero_rate() {
    let dir = TempDir::new().unwrap();
    let sources = write_sources(dir.path(), "sources.toml", "");
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1))).build();
    orchestrator.initialize().unwrap();

    let report = orchestrator.collect_all(&sources, dir.path()).await.unwrap();
    assert_eq!(report.totals.total, 0);
    assert_eq!(report.totals.success_rate, "0.0");
}

#[tokio::test]
async fn resumed_batch_skips_completed_and_keeps_failures() {
    let dir = TempDir::new().unwrap();
    let state_file = dir.path().join("state.json");
    let config = SchedulerConfig {
        state_file: Some(state_file.clone()),
        ..test_config(2)
    };
    let first_list = write_sources(
        dir.path(),
        "first.json",
        r#"{"sources": [{"id": "a"}, {"id": "b"}]}"#,
    );
    let second_list = write_sources(
        dir.path(),
        "second.json",
        r#"{"sources": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}"#,
    );

    let first_stub = Arc::new(StubCollector::failing(&["b"]));
    let first = Orchestrator::builder(Scheduler::new(config.clone()))
        .collector(SourceType::Blog, first_stub.clone())
        .collector_config(
            "blog",
            CollectorConfig {
                max_retries: Some(0),
                ..CollectorConfig::default()
            },
        )
        .build();
    first.initialize().unwrap();
    let report = first
        .collect_all(&first_list, &dir.path().join("out"))
        .await
        .unwrap();
    assert_eq!((report.totals.successful, report.totals.failed), (1, 1));
    first.shutdown();

    let second_stub = Arc::new(StubCollector::default());
    let second = Orchestrator::builder(Scheduler::new(config))
        .collector(SourceType::Blog, second_stub.clone())
        .build();
    second.initialize().unwrap();
    let report = second
        .collect_all(&second_list, &dir.path().join("out"))
        .await
        .unwrap();

    assert_eq!(second_stub.calls(), vec!["c".to_string()]);
    assert_eq!(report.totals.total, 3);
    assert_eq!(report.totals.successful, 1);
    assert_eq!(report.totals.failed, 1);
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.skipped[0].id, "a");
    assert_eq!(report.skipped[0].reason.as_deref(), Some("already completed"));
    assert_eq!(report.failed[0].error.as_deref(), Some("stub refused b"));
}

#[tokio::test]
async fn interrupted_source_is_collected_on_resume() {
    let dir = TempDir::new().unwrap();
    let state_file = dir.path().join("state.json");

    let mut interrupted = TaskRecord::new("ep-1", "podcast");
    interrupted.status = TaskStatus::Running;
    SchedulerSnapshot {
        running: vec![interrupted],
        ..SchedulerSnapshot::default()
    }
    .save_to_file(&state_file)
    .unwrap();

    let stub = Arc::new(StubCollector::default());
    let orchestrator = Orchestrator::builder(Scheduler::new(SchedulerConfig {
        state_file: Some(state_file),
        ..test_config(1)
    }))
    .collector(SourceType::Podcast, stub.clone())
    .build();
    orchestrator.initialize().unwrap();

    let report = orchestrator
        .collect_sources(
            vec![Source::new("ep-1", SourceType::Podcast).with_url("https://example.com/ep")],
            &dir.path().join("out"),
        )
        .await
        .unwrap();

    assert_eq!(report.totals.successful, 1);
    assert_eq!(stub.calls(), vec!["ep-1".to_string()]);
}

#[tokio::test]
async fn depends_on_orders_sources_and_duplicates_fail() {
    let dir = TempDir::new().unwrap();
    let sources = write_sources(
        dir.path(),
        "sources.json",
        r#"[
            {"id": "summary", "type": "blog", "depends_on": ["talk"]},
            {"id": "talk", "type": "youtube"},
            {"id": "talk", "type": "youtube"}
        ]"#,
    );

    let stub = Arc::new(StubCollector::default());
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(4)))
        .collector(SourceType::Blog, stub.clone())
        .collector(SourceType::Youtube, stub.clone())
        .build();
    orchestrator.initialize().unwrap();

    let report = orchestrator
        .collect_all(&sources, &dir.path().join("out"))
        .await
        .unwrap();

    assert_eq!(stub.calls(), vec!["talk".to_string(), "summary".to_string()]);
    assert_eq!(report.totals.successful, 2);
    assert_eq!(report.totals.failed, 1);
    assert_eq!(
        report.failed[0].error.as_deref(),
        Some("duplicate source id 'talk'")
    );
}

#[tokio::test]
async fn cancelled_source_is_reported_as_skipped() {
    let dir = TempDir::new().unwrap();
    let started = Arc::new(tokio::sync::Notify::new());
    let blocking = Arc::new(BlockingCollector {
        started: started.clone(),
        starts: AtomicUsize::new(0),
    });

    let orchestrator = Arc::new(
        Orchestrator::builder(Scheduler::new(test_config(1)))
            .collector(SourceType::Social, blocking.clone())
            .build(),
    );
    orchestrator.initialize().unwrap();

    let runner = {
        let orchestrator = orchestrator.clone();
        let out = dir.path().join("out");
        tokio::spawn(async move {
            orchestrator
                .collect_sources(vec![Source::new("thread", SourceType::Social)], &out)
                .await
        })
    };

    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    orchestrator.cancel("thread");

    let report = tokio::time::timeout(WAIT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.skipped[0].reason.as_deref(), Some("cancelled"));
    assert_eq!(report.totals.failed, 0);
    assert_eq!(blocking.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dependents_of_a_cancelled_source_are_skipped() {
    let dir = TempDir::new().unwrap();
    let started = Arc::new(tokio::sync::Notify::new());
    let blocking = Arc::new(BlockingCollector {
        started: started.clone(),
        starts: AtomicUsize::new(0),
    });
    let stub = Arc::new(StubCollector::default());

    let orchestrator = Arc::new(
        Orchestrator::builder(Scheduler::new(test_config(2)))
            .collector(SourceType::Social, blocking.clone())
            .collector(SourceType::Blog, stub.clone())
            .build(),
    );
    orchestrator.initialize().unwrap();

    let mut recap = Source::new("recap", SourceType::Blog);
    recap.depends_on = vec!["thread".to_string()];
    let runner = {
        let orchestrator = orchestrator.clone();
        let out = dir.path().join("out");
        tokio::spawn(async move {
            orchestrator
                .collect_sources(vec![Source::new("thread", SourceType::Social), recap], &out)
                .await
        })
    };

    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    orchestrator.cancel("thread");

    let report = tokio::time::timeout(WAIT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.totals.skipped, 2);
    assert_eq!(report.totals.failed, 0);
    let recap = report.skipped.iter().find(|o| o.id == "recap").unwrap();
    assert_eq!(recap.status, TaskStatus::Cancelled);
    assert_eq!(recap.reason.as_deref(), Some("cancelled"));
    assert_eq!(recap.error.as_deref(), Some("dependency 'thread' was cancelled"));
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn reporters_see_the_whole_batch() {
    let dir = TempDir::new().unwrap();
    let reporter = RecordingReporter::default();
    let log = reporter.log.clone();

    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1)))
        .collector(SourceType::Blog, Arc::new(StubCollector::default()))
        .reporter(Box::new(reporter))
        .build();
    orchestrator.initialize().unwrap();

    orchestrator
        .collect_sources(vec![Source::new("one", SourceType::Blog)], dir.path())
        .await
        .unwrap();
    orchestrator.shutdown();

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            "start:1",
            "task_added:one",
            "task_started:one",
            "task_completed:one",
            "end:1",
            "finish"
        ]
    );
}

#[tokio::test]
async fn factory_builds_registry_from_config() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let factory = move |source_type: &SourceType,
                        _config: &CollectorConfig|
          -> anyhow::Result<Option<Arc<dyn Collector>>> {
        counter.fetch_add(1, Ordering::SeqCst);
        if *source_type == SourceType::Social {
            return Ok(None);
        }
        Ok(Some(Arc::new(StubCollector::default())))
    };

    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1)))
        .factory(Arc::new(factory))
        .collector_config("YouTube", CollectorConfig::default())
        .collector_config("social", CollectorConfig::default())
        .collector_config(
            "pdf",
            CollectorConfig {
                enabled: false,
                ..CollectorConfig::default()
            },
        )
        .build();
    orchestrator.initialize().unwrap();

    let registry = orchestrator.registry().unwrap();
    assert_eq!(registry.types(), vec![SourceType::Youtube]);
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn factory_error_is_a_setup_error() {
    let factory = |_: &SourceType, _: &CollectorConfig| -> anyhow::Result<Option<Arc<dyn Collector>>> {
        anyhow::bail!("missing api key")
    };
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1)))
        .factory(Arc::new(factory))
        .collector_config("podcast", CollectorConfig::default())
        .build();

    let err = orchestrator.initialize().unwrap_err();
    assert!(matches!(err, OrchestratorError::CollectorSetup(_)));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("missing api key"));
}

#[tokio::test]
async fn results_are_carried_into_the_report() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::builder(Scheduler::new(test_config(1)))
        .collector(SourceType::Pdf, Arc::new(StubCollector::default()))
        .build();
    orchestrator.initialize().unwrap();

    let report = orchestrator
        .collect_sources(vec![Source::new("doc", SourceType::Pdf)], dir.path())
        .await
        .unwrap();

    let outcome = &report.successful[0];
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.result.as_ref().unwrap()["id"], json!("doc"));
    assert!(outcome.duration_ms.is_some());
}
