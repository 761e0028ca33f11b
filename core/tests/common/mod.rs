#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::orchestrator::{BatchReport, Collector, ProgressReporter, Source};
use harvest_core::scheduler::{
    executor_fn, SchedulerConfig, SchedulerEvent, TaskExecutor,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

/// Routes scheduler logs into the test harness output (`--nocapture` to see them).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("harvest_core=debug")
        .with_test_writer()
        .try_init();
}

/// Scheduler config for tests: no state file, no periodic timer.
pub fn test_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        persist_interval_ms: 0,
        ..SchedulerConfig::default()
    }
}

pub fn instant_ok(value: Value) -> Arc<dyn TaskExecutor> {
    executor_fn(move |_| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

pub fn always_fail(calls: Arc<AtomicUsize>, message: &'static str) -> Arc<dyn TaskExecutor> {
    executor_fn(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Err(anyhow::anyhow!(message)) }
    })
}

/// Returns `Ok` only once the test hands out a permit.
pub fn gated(gate: Arc<Semaphore>) -> Arc<dyn TaskExecutor> {
    executor_fn(move |_| {
        let gate = gate.clone();
        async move {
            let _permit = gate.acquire().await?;
            Ok(json!("released"))
        }
    })
}

/// Waits for cancellation, then reports success anyway.
pub fn ok_when_cancelled() -> Arc<dyn TaskExecutor> {
    executor_fn(|cancel: CancellationToken| async move {
        cancel.cancelled().await;
        Ok(json!("finished after cancel"))
    })
}

pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    mut pred: F,
) -> SchedulerEvent
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_event(ev: &SchedulerEvent, name: &str, id: &str) -> bool {
    ev.name() == name && ev.task().map(|t| t.id.as_str()) == Some(id)
}

pub fn drain(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/// Collector that succeeds unless the source id is listed in `fail_ids`.
#[derive(Default)]
pub struct StubCollector {
    pub calls: Mutex<Vec<String>>,
    pub fail_ids: Vec<String>,
}

impl StubCollector {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collector for StubCollector {
    fn name(&self) -> &str {
        "stub"
    }

    async fn collect(
        &self,
        source: &Source,
        output_dir: &Path,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(source.id.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail_ids.contains(&source.id) {
            anyhow::bail!("stub refused {}", source.id);
        }
        Ok(json!({ "id": source.id, "output": output_dir.display().to_string() }))
    }
}

/// Collector that signals when it starts and then waits to be cancelled.
pub struct BlockingCollector {
    pub started: Arc<tokio::sync::Notify>,
    pub starts: AtomicUsize,
}

#[async_trait]
impl Collector for BlockingCollector {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn collect(
        &self,
        _source: &Source,
        _output_dir: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        cancel.cancelled().await;
        anyhow::bail!("cancelled")
    }
}

/// Reporter that records what it saw into shared storage.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl ProgressReporter for RecordingReporter {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_batch_start(&mut self, total: usize) {
        self.log.lock().unwrap().push(format!("start:{total}"));
    }

    fn on_event(&mut self, event: &SchedulerEvent) {
        if let Some(task) = event.task() {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", event.name(), task.id));
        }
    }

    fn on_batch_end(&mut self, report: &BatchReport) {
        self.log
            .lock()
            .unwrap()
            .push(format!("end:{}", report.totals.total));
    }

    fn finish(&mut self) {
        self.log.lock().unwrap().push("finish".to_string());
    }
}
