use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;

use super::events::SchedulerEvent;
use super::graph::find_cycle;
use super::snapshot::SchedulerSnapshot;
use super::state::{Backoff, Effects, Lookup, SchedulerState, Start};
use super::traits::{NoDelay, RetryStrategy};
use super::types::{SchedulerConfig, SchedulerStats, TaskRecord, TaskSpec, TaskStatus};
use crate::error::SchedulerError;

/// Builder for [`Scheduler`].
///
/// Receivers obtained from [`SchedulerBuilder::subscribe`] also see the
/// `state_loaded` / `state_load_error` event emitted while building.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    retry: Arc<dyn RetryStrategy>,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerBuilder {
    pub fn retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    pub fn build(self) -> Scheduler {
        let state = load_state(&self.config, &self.event_tx);
        let runtime = Handle::try_current().ok();

        let (persist_tx, persist_rx) = match (&runtime, &self.config.state_file) {
            (Some(_), Some(_)) => {
                let (tx, rx) = watch::channel(0);
                (Some(tx), Some(rx))
            }
            _ => (None, None),
        };

        let inner = Arc::new(SchedulerInner {
            config: self.config,
            state: Mutex::new(state),
            event_tx: self.event_tx,
            changed: Notify::new(),
            retry: self.retry,
            runtime,
            persist_tx,
            revision: AtomicU64::new(0),
            written: Mutex::new(0),
            timer: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });
        if let (Some(rx), Some(runtime)) = (persist_rx, &inner.runtime) {
            runtime.spawn(run_persister(Arc::downgrade(&inner), rx));
        }
        inner.start_persist_timer();

        Scheduler { inner }
    }
}

fn load_state(
    config: &SchedulerConfig,
    event_tx: &broadcast::Sender<SchedulerEvent>,
) -> SchedulerState {
    let Some(path) = config.state_file.as_ref() else {
        return SchedulerState::default();
    };

    match SchedulerSnapshot::load_from_file(path) {
        Ok(Some(snapshot)) => {
            tracing::info!(
                path = %path.display(),
                pending = snapshot.pending_count(),
                completed = snapshot.completed.len(),
                failed = snapshot.failed.len(),
                "restored scheduler state"
            );
            let _ = event_tx.send(SchedulerEvent::StateLoaded {
                path: path.clone(),
                pending: snapshot.pending_count(),
                completed: snapshot.completed.len(),
                failed: snapshot.failed.len(),
            });
            SchedulerState::from_snapshot(snapshot)
        }
        Ok(None) => SchedulerState::default(),
        Err(e) => {
            tracing::error!(path = %path.display(), "failed to load scheduler state: {e:#}");
            let _ = event_tx.send(SchedulerEvent::StateLoadError {
                path: path.clone(),
                error: format!("{e:#}"),
            });
            SchedulerState::default()
        }
    }
}

/// Dependency-aware task scheduler with bounded concurrency, retries,
/// cooperative cancellation and JSON state snapshots.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    /// Signalled after every state change.
    changed: Notify,
    retry: Arc<dyn RetryStrategy>,
    /// Runtime the scheduler was built on, used when called from outside one.
    runtime: Option<Handle>,
    /// Latest requested snapshot revision; `None` writes inline.
    persist_tx: Option<watch::Sender<u64>>,
    /// Bumped under the state lock on every persisted change.
    revision: AtomicU64,
    /// Revision currently on disk. Held while writing.
    written: Mutex<u64>,
    timer: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        SchedulerBuilder {
            config,
            retry: Arc::new(NoDelay),
            event_tx,
        }
    }

    pub fn new(config: SchedulerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// 订阅调度事件
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Queues a task and runs an admission pass.
    ///
    /// Admitted tasks are spawned onto the current Tokio runtime, or the one
    /// the scheduler was built on. Without either the call fails with
    /// [`SchedulerError::NoRuntime`].
    pub fn add_task(&self, spec: TaskSpec) -> Result<(), SchedulerError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        if self.inner.runtime().is_none() {
            return Err(SchedulerError::NoRuntime);
        }
        if spec.id.trim().is_empty() {
            return Err(SchedulerError::MissingField("id"));
        }
        if spec.task_type.trim().is_empty() {
            return Err(SchedulerError::MissingField("type"));
        }

        let mut state = self.inner.lock();
        match state.lookup(&spec.id) {
            Lookup::Unknown | Lookup::Queued { dormant: true } => {}
            _ => return Err(SchedulerError::DuplicateTaskId(spec.id)),
        }
        if let Some(path) = find_cycle(state.dependencies(), &spec.id, &spec.dependencies) {
            return Err(SchedulerError::CircularDependency(path));
        }

        tracing::debug!(
            task_id = %spec.id,
            task_type = %spec.task_type,
            dependencies = ?spec.dependencies,
            "task added"
        );

        let mut record = TaskRecord::new(spec.id, spec.task_type);
        record.dependencies = spec.dependencies;
        record.max_retries = spec.max_retries;

        let event = state.enqueue(record, spec.executor);
        let mut effects = Effects::default();
        effects.events.push(event);
        self.inner.commit(&mut state, effects);
        Ok(())
    }

    /// Adds tasks in order, stopping at the first error.
    pub fn add_tasks<I>(&self, specs: I) -> Result<(), SchedulerError>
    where
        I: IntoIterator<Item = TaskSpec>,
    {
        specs.into_iter().try_for_each(|spec| self.add_task(spec))
    }

    /// Requests cancellation. Safe to call any number of times, for any id.
    pub fn cancel_task(&self, id: &str) {
        let mut state = self.inner.lock();
        let effects = state.cancel(id);
        self.inner.commit(&mut state, effects);
    }

    pub fn cancel_all(&self) {
        let mut state = self.inner.lock();
        let mut effects = Effects::default();
        for id in state.live_ids() {
            effects.merge(state.cancel(&id));
        }
        self.inner.commit(&mut state, effects);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats()
    }

    pub fn task(&self, id: &str) -> Option<TaskRecord> {
        self.inner.lock().task(id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        match self.inner.lock().lookup(id) {
            Lookup::Terminal(status) => Some(status),
            Lookup::Running => Some(TaskStatus::Running),
            Lookup::Delayed => Some(TaskStatus::Retrying),
            Lookup::Queued { .. } => Some(TaskStatus::Pending),
            Lookup::Unknown => None,
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.inner.lock().snapshot()
    }

    /// Queued tasks that can no longer be admitted, with the dependencies
    /// they are waiting on. Only meaningful once the scheduler is settled.
    pub fn stalled(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().stalled()
    }

    /// Clears every collection and the metrics, then persists the empty state.
    pub fn flush(&self) {
        self.inner.lock().clear();
        tracing::info!("scheduler state flushed");
        self.inner.persist_now();
        self.inner.changed.notify_waiters();
    }

    /// Stops the persistence timer and writes a final snapshot before
    /// returning.
    pub fn shutdown(&self) {
        if let Some(timer) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        self.inner.shut_down.store(true, Ordering::SeqCst);

        self.inner.persist_now();
        tracing::debug!("scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Resolves once nothing is running, in backoff or queued.
    pub async fn wait_until_idle(&self) {
        self.wait_for(SchedulerState::is_idle).await
    }

    /// Resolves once no further progress is possible without new input.
    pub async fn wait_until_settled(&self) {
        self.wait_for(SchedulerState::is_settled).await
    }

    async fn wait_for(&self, done: fn(&SchedulerState) -> bool) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let finished = done(&self.inner.lock());
            if finished {
                return;
            }
            notified.await;
        }
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn runtime(&self) -> Option<Handle> {
        Handle::try_current().ok().or_else(|| self.runtime.clone())
    }

    /// Runs an admission pass on top of `effects`, then applies all of it:
    /// events, spawns, persistence and the change signal.
    ///
    /// Without a runtime, admission waits for the next commit that has one.
    fn commit(self: &Arc<Self>, state: &mut SchedulerState, mut effects: Effects) {
        let runtime = self.runtime();
        if runtime.is_some() {
            effects.merge(state.admit(
                self.config.max_concurrent,
                self.config.cascade_failures,
            ));
        }

        for event in effects.events {
            self.emit(event);
        }
        if let Some(runtime) = &runtime {
            for start in effects.starts {
                self.spawn_attempt(runtime, start);
            }
            for backoff in effects.backoffs {
                self.spawn_backoff(runtime, backoff);
            }
        }

        self.request_persist(state);
        self.changed.notify_waiters();
    }

    fn spawn_attempt(self: &Arc<Self>, runtime: &Handle, start: Start) {
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let outcome = inner.run_attempt(&start).await;

            let mut state = inner.lock();
            let effects = state.settle(
                &start.id,
                start.generation,
                outcome,
                inner.config.max_retries,
                inner.retry.as_ref(),
            );
            inner.commit(&mut state, effects);
        });
    }

    async fn run_attempt(&self, start: &Start) -> Result<Value, String> {
        let attempt = AssertUnwindSafe(start.executor.execute(start.cancel.clone())).catch_unwind();

        let result = match self.config.task_timeout() {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => return Err(format!("task timed out after {}ms", limit.as_millis())),
            },
            None => attempt.await,
        };

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(format!("task panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    fn spawn_backoff(self: &Arc<Self>, runtime: &Handle, backoff: Backoff) {
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(backoff.delay) => {}
                _ = backoff.cancel.cancelled() => {}
            }

            let mut state = inner.lock();
            if state.requeue_delayed(&backoff.id, backoff.generation) {
                inner.commit(&mut state, Effects::default());
            }
        });
    }

    /// Marks the state dirty. The persister task picks up the latest revision;
    /// intermediate ones are skipped.
    fn request_persist(&self, state: &SchedulerState) {
        if self.config.state_file.is_none() {
            return;
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.persist_tx {
            Some(tx) => {
                tx.send_replace(revision);
            }
            None => self.write_snapshot(revision, &state.snapshot()),
        }
    }

    /// Writes the current state on the calling thread.
    fn persist_now(&self) {
        if self.config.state_file.is_none() {
            return;
        }
        let (revision, snapshot) = {
            let state = self.lock();
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            (revision, state.snapshot())
        };
        self.write_snapshot(revision, &snapshot);
    }

    fn capture(&self) -> (u64, SchedulerSnapshot) {
        let state = self.lock();
        (self.revision.load(Ordering::SeqCst), state.snapshot())
    }

    fn write_snapshot(&self, revision: u64, snapshot: &SchedulerSnapshot) {
        let Some(path) = self.config.state_file.as_ref() else {
            return;
        };

        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if revision < *written {
            return;
        }
        match snapshot.save_to_file(path) {
            Ok(()) => {
                *written = revision;
                self.emit(SchedulerEvent::StateSaved { path: path.clone() });
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "failed to persist scheduler state: {e:#}");
                self.emit(SchedulerEvent::StateSaveError {
                    path: path.clone(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    fn start_persist_timer(self: &Arc<Self>) {
        let Some(interval) = self.config.persist_interval() else {
            return;
        };
        if self.config.state_file.is_none() {
            return;
        }
        let Some(handle) = self.runtime.as_ref() else {
            tracing::debug!("no tokio runtime; periodic persistence disabled");
            return;
        };

        let weak = Arc::downgrade(self);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                {
                    let state = inner.lock();
                    inner.request_persist(&state);
                }
            }
        });

        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

/// Single writer for the state file. Snapshots are taken under the lock and
/// written on the blocking pool, so workers never wait on disk I/O.
async fn run_persister(weak: Weak<SchedulerInner>, mut rx: watch::Receiver<u64>) {
    while rx.changed().await.is_ok() {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let (revision, snapshot) = inner.capture();
        let write = tokio::task::spawn_blocking(move || inner.write_snapshot(revision, &snapshot));
        if let Err(e) = write.await {
            tracing::error!("scheduler state writer failed: {e}");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
