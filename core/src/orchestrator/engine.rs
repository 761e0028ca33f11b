use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;
use super::registry::{Collector, CollectorFactory, CollectorRegistry};
use super::report::{BatchReport, SourceOutcome};
use super::source::{group_by_type, load_sources, Source, SourceType};
use crate::config::{AppConfig, CollectorConfig};
use crate::error::{OrchestratorError, SchedulerError};
use crate::scheduler::{
    Scheduler, SchedulerEvent, TaskExecutor, TaskRecord, TaskSpec, TaskStatus,
};

/// Runs one source through its collector.
struct CollectTask {
    collector: Arc<dyn Collector>,
    source: Source,
    output_dir: PathBuf,
}

#[async_trait]
impl TaskExecutor for CollectTask {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Value> {
        self.collector
            .collect(&self.source, &self.output_dir, &cancel)
            .await
    }
}

/// Stand-in for a type nobody registered a collector for.
struct MissingCollector {
    source_type: SourceType,
}

#[async_trait]
impl TaskExecutor for MissingCollector {
    async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<Value> {
        anyhow::bail!(
            "no collector registered for source type '{}'",
            self.source_type
        )
    }
}

/// How a source entered the batch.
enum Disposition {
    Scheduled,
    /// Already completed in a restored snapshot.
    AlreadyCompleted,
    /// Already failed in a restored snapshot.
    AlreadyFailed,
    AlreadyCancelled,
    Rejected(String),
}

struct PlanEntry {
    id: String,
    source_type: SourceType,
    disposition: Disposition,
}

pub struct OrchestratorBuilder {
    scheduler: Scheduler,
    default_source_type: SourceType,
    collector_configs: BTreeMap<String, CollectorConfig>,
    factory: Option<Arc<dyn CollectorFactory>>,
    preset: Vec<(SourceType, Arc<dyn Collector>)>,
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl OrchestratorBuilder {
    /// Takes the default source type and `[collectors.*]` sections.
    pub fn app_config(mut self, config: &AppConfig) -> Self {
        self.default_source_type = SourceType::from(config.orchestrator.default_source_type.as_str());
        self.collector_configs = config.collectors.clone();
        self
    }

    pub fn default_source_type(mut self, source_type: SourceType) -> Self {
        self.default_source_type = source_type;
        self
    }

    pub fn collector_config(mut self, source_type: &str, config: CollectorConfig) -> Self {
        self.collector_configs.insert(source_type.to_string(), config);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn CollectorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Registers a ready-made collector; takes precedence over the factory.
    pub fn collector(mut self, source_type: SourceType, collector: Arc<dyn Collector>) -> Self {
        self.preset.push((source_type, collector));
        self
    }

    pub fn reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn build(self) -> Orchestrator {
        // Config keys are matched case-insensitively, like source types.
        let collector_configs = self
            .collector_configs
            .into_iter()
            .map(|(k, v)| (SourceType::from(k.as_str()), v))
            .collect();

        Orchestrator {
            scheduler: self.scheduler,
            default_source_type: self.default_source_type,
            collector_configs,
            factory: self.factory,
            preset: self.preset,
            registry: RwLock::new(None),
            reporters: Mutex::new(self.reporters),
        }
    }
}

/// Turns a source list into scheduler tasks and reports on the batch.
pub struct Orchestrator {
    scheduler: Scheduler,
    default_source_type: SourceType,
    collector_configs: HashMap<SourceType, CollectorConfig>,
    factory: Option<Arc<dyn CollectorFactory>>,
    preset: Vec<(SourceType, Arc<dyn Collector>)>,
    registry: RwLock<Option<Arc<CollectorRegistry>>>,
    reporters: Mutex<Vec<Box<dyn ProgressReporter>>>,
}

impl Orchestrator {
    pub fn builder(scheduler: Scheduler) -> OrchestratorBuilder {
        OrchestratorBuilder {
            scheduler,
            default_source_type: SourceType::default(),
            collector_configs: BTreeMap::new(),
            factory: None,
            preset: Vec::new(),
            reporters: Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> Option<Arc<CollectorRegistry>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds the collector registry. Must run before [`Self::collect_all`].
    pub fn initialize(&self) -> Result<(), OrchestratorError> {
        let mut registry = CollectorRegistry::new();
        for (source_type, collector) in &self.preset {
            registry.register(source_type.clone(), Arc::clone(collector));
        }

        if let Some(factory) = &self.factory {
            let mut types: BTreeSet<SourceType> = factory.default_types().into_iter().collect();
            types.extend(self.collector_configs.keys().cloned());

            for source_type in types {
                if registry.contains(&source_type) {
                    continue;
                }
                let config = self
                    .collector_configs
                    .get(&source_type)
                    .cloned()
                    .unwrap_or_default();
                if !config.enabled {
                    tracing::debug!(%source_type, "collector disabled by config");
                    continue;
                }
                let created = factory.create(&source_type, &config).map_err(|e| {
                    OrchestratorError::CollectorSetup(
                        e.context(format!("collector for source type '{source_type}'")),
                    )
                })?;
                if let Some(collector) = created {
                    registry.register(source_type, collector);
                }
            }
        }

        tracing::info!(types = ?registry.types(), "orchestrator initialized");
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(registry));
        Ok(())
    }

    /// Loads `sources_path` and collects every source into `output_dir`.
    ///
    /// Per-source failures end up in the report; only fatal preconditions
    /// are returned as errors.
    pub async fn collect_all(
        &self,
        sources_path: &Path,
        output_dir: &Path,
    ) -> Result<BatchReport, OrchestratorError> {
        if self.registry().is_none() {
            return Err(OrchestratorError::NotInitialized);
        }

        let sources = load_sources(sources_path, &self.default_source_type).map_err(|source| {
            OrchestratorError::SourceList {
                path: sources_path.to_path_buf(),
                source,
            }
        })?;

        self.collect_sources(sources, output_dir).await
    }

    /// Same as [`Self::collect_all`] for an already loaded source list.
    pub async fn collect_sources(
        &self,
        sources: Vec<Source>,
        output_dir: &Path,
    ) -> Result<BatchReport, OrchestratorError> {
        let registry = self.registry().ok_or(OrchestratorError::NotInitialized)?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| OrchestratorError::OutputDir {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let started_at = Utc::now();
        let groups = group_by_type(&sources);
        tracing::info!(
            total = sources.len(),
            types = groups.len(),
            output = %output_dir.display(),
            "starting collection batch"
        );

        let mut reporters = std::mem::take(
            &mut *self.reporters.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for reporter in reporters.iter_mut() {
            reporter.on_batch_start(sources.len());
        }
        let stop = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            self.scheduler.subscribe(),
            reporters,
            stop.clone(),
        ));

        let planned = self.schedule(&groups, &registry, output_dir);

        if planned.is_ok() {
            self.scheduler.wait_until_settled().await;
        }

        stop.cancel();
        let mut reporters = match pump.await {
            Ok(reporters) => reporters,
            Err(e) => {
                tracing::warn!("progress reporter task failed: {e}");
                Vec::new()
            }
        };

        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                self.restore_reporters(reporters);
                return Err(e);
            }
        };

        let report = self.build_report(started_at, plan);
        tracing::info!(
            total = report.totals.total,
            successful = report.totals.successful,
            failed = report.totals.failed,
            skipped = report.totals.skipped,
            success_rate = %report.totals.success_rate,
            duration = %report.duration.human,
            "collection batch finished"
        );

        for reporter in reporters.iter_mut() {
            reporter.on_batch_end(&report);
        }
        self.restore_reporters(reporters);

        Ok(report)
    }

    fn schedule(
        &self,
        groups: &BTreeMap<SourceType, Vec<&Source>>,
        registry: &CollectorRegistry,
        output_dir: &Path,
    ) -> Result<Vec<PlanEntry>, OrchestratorError> {
        let mut plan = Vec::new();
        let mut seen = HashSet::new();

        for (source_type, group) in groups {
            let collector = registry.get(source_type);
            if collector.is_none() {
                tracing::warn!(
                    %source_type,
                    count = group.len(),
                    "no collector registered; sources of this type will fail"
                );
            }

            for source in group {
                let disposition = if !seen.insert(source.id.clone()) {
                    Disposition::Rejected(format!("duplicate source id '{}'", source.id))
                } else {
                    match self.scheduler.status(&source.id) {
                        Some(TaskStatus::Completed) => Disposition::AlreadyCompleted,
                        Some(TaskStatus::Failed) => Disposition::AlreadyFailed,
                        Some(TaskStatus::Cancelled) => Disposition::AlreadyCancelled,
                        _ => {
                            let spec = self.task_spec(source, collector.clone(), output_dir);
                            match self.scheduler.add_task(spec) {
                                Ok(()) => Disposition::Scheduled,
                                Err(e @ (SchedulerError::ShutDown | SchedulerError::NoRuntime)) => {
                                    return Err(e.into())
                                }
                                Err(SchedulerError::DuplicateTaskId(id)) => Disposition::Rejected(
                                    format!("source '{id}' is already being collected"),
                                ),
                                Err(e) => Disposition::Rejected(e.to_string()),
                            }
                        }
                    }
                };

                plan.push(PlanEntry {
                    id: source.id.clone(),
                    source_type: source_type.clone(),
                    disposition,
                });
            }
        }

        Ok(plan)
    }

    fn task_spec(
        &self,
        source: &Source,
        collector: Option<Arc<dyn Collector>>,
        output_dir: &Path,
    ) -> TaskSpec {
        let (executor, max_retries): (Arc<dyn TaskExecutor>, Option<u32>) = match collector {
            Some(collector) => (
                Arc::new(CollectTask {
                    collector,
                    source: source.clone(),
                    output_dir: output_dir.to_path_buf(),
                }),
                self.collector_configs
                    .get(&source.source_type)
                    .and_then(|c| c.max_retries),
            ),
            None => (
                Arc::new(MissingCollector {
                    source_type: source.source_type.clone(),
                }),
                Some(0),
            ),
        };

        let mut spec = TaskSpec::new(&source.id, source.source_type.as_str(), executor)
            .depends_on(source.depends_on.iter().cloned());
        spec.max_retries = max_retries;
        spec
    }

    fn build_report(&self, started_at: chrono::DateTime<Utc>, plan: Vec<PlanEntry>) -> BatchReport {
        let stalled: HashMap<String, Vec<String>> = self.scheduler.stalled().into_iter().collect();

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();

        for entry in plan {
            let record = self.scheduler.task(&entry.id);
            match entry.disposition {
                Disposition::Rejected(error) => {
                    failed.push(SourceOutcome {
                        id: entry.id,
                        source_type: entry.source_type,
                        status: TaskStatus::Failed,
                        attempts: 0,
                        duration_ms: None,
                        error: Some(error),
                        reason: None,
                        result: None,
                    });
                }
                Disposition::AlreadyCompleted => {
                    skipped.push(outcome(entry, record, Some("already completed".to_string())))
                }
                Disposition::AlreadyCancelled => skipped.push(outcome(
                    entry,
                    record,
                    Some("cancelled in a previous run".to_string()),
                )),
                Disposition::AlreadyFailed => failed.push(outcome(entry, record, None)),
                Disposition::Scheduled => match record.as_ref().map(|r| r.status) {
                    Some(TaskStatus::Completed) => successful.push(outcome(entry, record, None)),
                    Some(TaskStatus::Failed) => failed.push(outcome(entry, record, None)),
                    Some(TaskStatus::Cancelled) => {
                        skipped.push(outcome(entry, record, Some("cancelled".to_string())))
                    }
                    _ => {
                        let waiting = stalled.get(&entry.id).cloned().unwrap_or_default();
                        tracing::warn!(
                            source_id = %entry.id,
                            waiting_on = ?waiting,
                            "source never became runnable"
                        );
                        let reason = if waiting.is_empty() {
                            "not started".to_string()
                        } else {
                            format!("waiting on dependencies: {}", waiting.join(", "))
                        };
                        skipped.push(outcome(entry, record, Some(reason)));
                    }
                },
            }
        }

        BatchReport::new(started_at, Utc::now(), successful, failed, skipped)
    }

    fn restore_reporters(&self, reporters: Vec<Box<dyn ProgressReporter>>) {
        self.reporters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(reporters);
    }

    pub fn cancel(&self, source_id: &str) {
        self.scheduler.cancel_task(source_id);
    }

    pub fn cancel_all(&self) {
        self.scheduler.cancel_all();
    }

    /// Stops the scheduler and lets reporters flush.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        let mut reporters = self.reporters.lock().unwrap_or_else(PoisonError::into_inner);
        for reporter in reporters.iter_mut() {
            reporter.finish();
        }
    }
}

fn outcome(entry: PlanEntry, record: Option<TaskRecord>, reason: Option<String>) -> SourceOutcome {
    let status = record
        .as_ref()
        .map(|r| r.status)
        .unwrap_or(TaskStatus::Pending);
    SourceOutcome {
        id: entry.id,
        source_type: entry.source_type,
        status,
        attempts: record.as_ref().map(|r| r.attempts).unwrap_or_default(),
        duration_ms: record.as_ref().and_then(|r| r.duration_ms),
        error: record.as_ref().and_then(|r| r.error.clone()),
        reason,
        result: record.and_then(|r| r.result),
    }
}

/// Forwards scheduler events to reporters until `stop` fires, then drains
/// what is already buffered and hands the reporters back.
async fn pump_events(
    mut rx: broadcast::Receiver<SchedulerEvent>,
    mut reporters: Vec<Box<dyn ProgressReporter>>,
    stop: CancellationToken,
) -> Vec<Box<dyn ProgressReporter>> {
    let dispatch = |reporters: &mut Vec<Box<dyn ProgressReporter>>, event: &SchedulerEvent| {
        for reporter in reporters.iter_mut() {
            reporter.on_event(event);
        }
    };

    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(event) => dispatch(&mut reporters, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress reporters fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = stop.cancelled() => {
                loop {
                    match rx.try_recv() {
                        Ok(event) => dispatch(&mut reporters, &event),
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }

    reporters
}
