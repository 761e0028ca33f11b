use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::events::SchedulerEvent;
use super::snapshot::SchedulerSnapshot;
use super::traits::{RetryStrategy, TaskExecutor};
use super::transitions::StateTransition;
use super::types::{SchedulerMetrics, SchedulerStats, TaskRecord, TaskStatus};

/// A task as held in memory: its record plus the runtime-only parts.
pub(crate) struct TaskEntry {
    pub record: TaskRecord,
    /// `None` for dormant tasks restored from a snapshot.
    pub executor: Option<Arc<dyn TaskExecutor>>,
    pub cancel: CancellationToken,
    pub started: Option<Instant>,
}

impl TaskEntry {
    fn new(record: TaskRecord, executor: Option<Arc<dyn TaskExecutor>>) -> Self {
        Self {
            record,
            executor,
            cancel: CancellationToken::new(),
            started: None,
        }
    }
}

/// A task that was just admitted and must be spawned.
pub(crate) struct Start {
    pub id: String,
    pub generation: u64,
    pub executor: Arc<dyn TaskExecutor>,
    pub cancel: CancellationToken,
}

/// A failed task waiting out its retry delay.
pub(crate) struct Backoff {
    pub id: String,
    pub generation: u64,
    pub delay: Duration,
    pub cancel: CancellationToken,
}

/// Side effects produced by a state mutation, applied by the engine while
/// it still holds the state lock.
#[derive(Default)]
pub(crate) struct Effects {
    pub events: Vec<SchedulerEvent>,
    pub starts: Vec<Start>,
    pub backoffs: Vec<Backoff>,
}

impl Effects {
    pub fn merge(&mut self, other: Effects) {
        self.events.extend(other.events);
        self.starts.extend(other.starts);
        self.backoffs.extend(other.backoffs);
    }
}

pub(crate) enum Lookup {
    Queued { dormant: bool },
    Running,
    Delayed,
    Terminal(TaskStatus),
    Unknown,
}

/// Everything the scheduler owns. Only ever touched under one mutex.
#[derive(Default)]
pub(crate) struct SchedulerState {
    queue: VecDeque<TaskEntry>,
    running: HashMap<String, TaskEntry>,
    delayed: HashMap<String, TaskEntry>,
    completed: Vec<TaskRecord>,
    failed: Vec<TaskRecord>,
    cancelled: Vec<TaskRecord>,
    terminal: HashMap<String, TaskStatus>,
    cancel_requests: HashSet<String>,
    dependencies: HashMap<String, Vec<String>>,
    metrics: SchedulerMetrics,
    /// Bumped by `flush`; settlements from an older generation are dropped.
    generation: u64,
}

fn move_to(record: &mut TaskRecord, to: TaskStatus) {
    if let Err(e) = StateTransition::validate(record.status, to) {
        tracing::warn!(task_id = %record.id, "{e}");
    }
    record.transition_to(to);
}

impl SchedulerState {
    /// Rebuilds state from a snapshot. Queued and previously running tasks
    /// come back as dormant pending tasks.
    pub fn from_snapshot(snapshot: SchedulerSnapshot) -> Self {
        let mut state = Self::default();

        for mut record in snapshot.queue.into_iter().chain(snapshot.running) {
            record.status = TaskStatus::Pending;
            record.started_at = None;
            state.queue.push_back(TaskEntry::new(record, None));
        }
        for record in &snapshot.completed {
            state.terminal.insert(record.id.clone(), TaskStatus::Completed);
        }
        for record in &snapshot.failed {
            state.terminal.insert(record.id.clone(), TaskStatus::Failed);
        }
        for record in &snapshot.cancelled {
            state.terminal.insert(record.id.clone(), TaskStatus::Cancelled);
            state.cancel_requests.insert(record.id.clone());
        }

        state.completed = snapshot.completed;
        state.failed = snapshot.failed;
        state.cancelled = snapshot.cancelled;
        state.metrics = snapshot.metrics;
        state.dependencies = snapshot.dependencies.into_iter().collect();
        state
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queue: self
                .queue
                .iter()
                .chain(self.delayed.values())
                .map(|e| e.record.clone())
                .collect(),
            running: self.running.values().map(|e| e.record.clone()).collect(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            cancelled: self.cancelled.clone(),
            metrics: self.metrics.clone(),
            dependencies: self
                .dependencies
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let pending = self.queue.len() + self.delayed.len();
        let running = self.running.len();
        SchedulerStats {
            pending,
            running,
            completed: self.completed.len(),
            failed: self.failed.len(),
            cancelled: self.cancelled.len(),
            total: pending + running + self.completed.len() + self.failed.len() + self.cancelled.len(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn lookup(&self, id: &str) -> Lookup {
        if let Some(status) = self.terminal.get(id) {
            return Lookup::Terminal(*status);
        }
        if self.running.contains_key(id) {
            return Lookup::Running;
        }
        if self.delayed.contains_key(id) {
            return Lookup::Delayed;
        }
        match self.queue.iter().find(|e| e.record.id == id) {
            Some(entry) => Lookup::Queued {
                dormant: entry.executor.is_none(),
            },
            None => Lookup::Unknown,
        }
    }

    pub fn task(&self, id: &str) -> Option<TaskRecord> {
        self.running
            .get(id)
            .or_else(|| self.delayed.get(id))
            .or_else(|| self.queue.iter().find(|e| e.record.id == id))
            .map(|e| e.record.clone())
            .or_else(|| {
                self.completed
                    .iter()
                    .chain(&self.failed)
                    .chain(&self.cancelled)
                    .find(|r| r.id == id)
                    .cloned()
            })
    }

    pub fn dependencies(&self) -> &HashMap<String, Vec<String>> {
        &self.dependencies
    }

    pub fn is_idle(&self) -> bool {
        self.is_settled() && self.queue.is_empty()
    }

    /// Nothing in flight or in backoff. Admission runs after every change,
    /// so whatever is still queued at this point cannot be admitted.
    pub fn is_settled(&self) -> bool {
        self.running.is_empty() && self.delayed.is_empty()
    }

    /// Queues a new task, or rebinds the executor of a dormant one.
    pub fn enqueue(
        &mut self,
        mut record: TaskRecord,
        executor: Arc<dyn TaskExecutor>,
    ) -> SchedulerEvent {
        self.dependencies
            .insert(record.id.clone(), record.dependencies.clone());

        if let Some(entry) = self
            .queue
            .iter_mut()
            .find(|e| e.record.id == record.id && e.executor.is_none())
        {
            entry.record.task_type = record.task_type;
            entry.record.dependencies = record.dependencies;
            entry.record.max_retries = record.max_retries;
            entry.record.updated_at = chrono::Utc::now();
            entry.executor = Some(executor);
            return SchedulerEvent::TaskAdded {
                task: entry.record.clone(),
            };
        }

        record.status = TaskStatus::Pending;
        let event = SchedulerEvent::TaskAdded {
            task: record.clone(),
        };
        self.queue.push_back(TaskEntry::new(record, Some(executor)));
        event
    }

    /// Sweeps cancelled and doomed tasks out of the queue, then starts
    /// runnable tasks in FIFO order while slots are free.
    pub fn admit(&mut self, max_concurrent: usize, cascade: bool) -> Effects {
        let mut effects = Effects::default();
        while self.sweep(cascade, &mut effects) {}

        let limit = max_concurrent.max(1);
        while self.running.len() < limit {
            let Some(pos) = self.queue.iter().position(|e| self.is_admissible(e)) else {
                break;
            };
            let Some(mut entry) = self.queue.remove(pos) else {
                break;
            };
            let Some(executor) = entry.executor.clone() else {
                break;
            };

            move_to(&mut entry.record, TaskStatus::Running);
            entry.started = Some(Instant::now());
            self.metrics.tasks_started += 1;
            tracing::debug!(task_id = %entry.record.id, attempt = entry.record.attempts + 1, "task admitted");

            effects.events.push(SchedulerEvent::TaskStarted {
                task: entry.record.clone(),
            });
            effects.starts.push(Start {
                id: entry.record.id.clone(),
                generation: self.generation,
                executor,
                cancel: entry.cancel.clone(),
            });
            self.running.insert(entry.record.id.clone(), entry);
        }

        effects
    }

    fn is_admissible(&self, entry: &TaskEntry) -> bool {
        entry.executor.is_some()
            && !self.cancel_requests.contains(&entry.record.id)
            && entry
                .record
                .dependencies
                .iter()
                .all(|dep| self.terminal.get(dep) == Some(&TaskStatus::Completed))
    }

    /// One pass over the queue. Returns whether anything moved, since a
    /// cascade failure can doom further dependents.
    fn sweep(&mut self, cascade: bool, effects: &mut Effects) -> bool {
        let mut changed = false;
        let mut kept = VecDeque::with_capacity(self.queue.len());

        while let Some(mut entry) = self.queue.pop_front() {
            if self.cancel_requests.contains(&entry.record.id) {
                move_to(&mut entry.record, TaskStatus::Cancelled);
                self.finish_cancelled(entry.record, effects);
                changed = true;
                continue;
            }

            let doomed = cascade
                .then(|| {
                    entry.record.dependencies.iter().find_map(|dep| {
                        match self.terminal.get(dep) {
                            Some(TaskStatus::Failed) => {
                                Some((TaskStatus::Failed, format!("dependency '{dep}' failed")))
                            }
                            Some(TaskStatus::Cancelled) => Some((
                                TaskStatus::Cancelled,
                                format!("dependency '{dep}' was cancelled"),
                            )),
                            _ => None,
                        }
                    })
                })
                .flatten();

            match doomed {
                Some((TaskStatus::Cancelled, reason)) => {
                    entry.record.error = Some(reason);
                    move_to(&mut entry.record, TaskStatus::Cancelled);
                    self.finish_cancelled(entry.record, effects);
                    changed = true;
                }
                Some((_, error)) => {
                    entry.record.error = Some(error);
                    move_to(&mut entry.record, TaskStatus::Failed);
                    self.finish_failed(entry.record, effects);
                    changed = true;
                }
                None => kept.push_back(entry),
            }
        }

        self.queue = kept;
        changed
    }

    fn finish_failed(&mut self, record: TaskRecord, effects: &mut Effects) {
        tracing::warn!(
            task_id = %record.id,
            attempts = record.attempts,
            error = record.error.as_deref().unwrap_or(""),
            "task failed"
        );
        self.metrics.tasks_failed += 1;
        self.terminal.insert(record.id.clone(), TaskStatus::Failed);
        effects.events.push(SchedulerEvent::TaskFailed {
            task: record.clone(),
        });
        self.failed.push(record);
    }

    fn finish_cancelled(&mut self, record: TaskRecord, effects: &mut Effects) {
        tracing::info!(task_id = %record.id, "task cancelled");
        self.metrics.tasks_cancelled += 1;
        self.terminal.insert(record.id.clone(), TaskStatus::Cancelled);
        effects.events.push(SchedulerEvent::TaskCancelled {
            task: record.clone(),
        });
        self.cancelled.push(record);
    }

    /// Applies the outcome of one execution attempt.
    pub fn settle(
        &mut self,
        id: &str,
        generation: u64,
        outcome: Result<Value, String>,
        default_max_retries: u32,
        retry: &dyn RetryStrategy,
    ) -> Effects {
        let mut effects = Effects::default();
        if generation != self.generation {
            return effects;
        }
        let Some(mut entry) = self.running.remove(id) else {
            return effects;
        };

        let elapsed_ms = entry
            .started
            .take()
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or_default();

        if entry.cancel.is_cancelled() || self.cancel_requests.contains(id) {
            move_to(&mut entry.record, TaskStatus::Cancelled);
            self.finish_cancelled(entry.record, &mut effects);
            return effects;
        }

        match outcome {
            Ok(value) => {
                entry.record.result = Some(value);
                entry.record.error = None;
                entry.record.duration_ms = Some(elapsed_ms);
                move_to(&mut entry.record, TaskStatus::Completed);
                self.metrics.tasks_completed += 1;
                self.metrics.record_duration(elapsed_ms);
                self.terminal
                    .insert(entry.record.id.clone(), TaskStatus::Completed);
                tracing::info!(task_id = %id, duration_ms = elapsed_ms, "task completed");
                effects.events.push(SchedulerEvent::TaskCompleted {
                    task: entry.record.clone(),
                });
                self.completed.push(entry.record);
            }
            Err(error) => {
                entry.record.attempts += 1;
                let max_retries = entry.record.max_retries.unwrap_or(default_max_retries);
                let fatal = retry.is_fatal_error(&error);
                entry.record.error = Some(error);

                if entry.record.attempts <= max_retries && !fatal {
                    let delay = retry
                        .next_delay(entry.record.attempts, entry.record.error.as_deref().unwrap_or(""))
                        .unwrap_or_default();
                    move_to(&mut entry.record, TaskStatus::Retrying);
                    self.metrics.tasks_retried += 1;
                    tracing::warn!(
                        task_id = %id,
                        attempts = entry.record.attempts,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = entry.record.error.as_deref().unwrap_or(""),
                        "task attempt failed, retrying"
                    );
                    effects.events.push(SchedulerEvent::TaskRetrying {
                        task: entry.record.clone(),
                        delay_ms: delay.as_millis() as u64,
                    });

                    if delay.is_zero() {
                        move_to(&mut entry.record, TaskStatus::Pending);
                        self.queue.push_back(entry);
                    } else {
                        effects.backoffs.push(Backoff {
                            id: id.to_string(),
                            generation: self.generation,
                            delay,
                            cancel: entry.cancel.clone(),
                        });
                        self.delayed.insert(id.to_string(), entry);
                    }
                } else {
                    move_to(&mut entry.record, TaskStatus::Failed);
                    self.finish_failed(entry.record, &mut effects);
                }
            }
        }

        effects
    }

    /// Moves a task back to the queue once its backoff elapsed.
    pub fn requeue_delayed(&mut self, id: &str, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.delayed.remove(id) {
            Some(mut entry) => {
                move_to(&mut entry.record, TaskStatus::Pending);
                self.queue.push_back(entry);
                true
            }
            None => false,
        }
    }

    /// Records a cancellation request; terminal tasks are left alone.
    pub fn cancel(&mut self, id: &str) -> Effects {
        let mut effects = Effects::default();
        match self.lookup(id) {
            Lookup::Terminal(_) => return effects,
            Lookup::Running => {
                if let Some(entry) = self.running.get(id) {
                    entry.cancel.cancel();
                }
            }
            Lookup::Delayed => {
                if let Some(mut entry) = self.delayed.remove(id) {
                    entry.cancel.cancel();
                    move_to(&mut entry.record, TaskStatus::Cancelled);
                    self.finish_cancelled(entry.record, &mut effects);
                }
            }
            Lookup::Queued { .. } => {
                if let Some(entry) = self.queue.iter().find(|e| e.record.id == id) {
                    entry.cancel.cancel();
                }
            }
            Lookup::Unknown => {
                tracing::debug!(task_id = %id, "cancel requested for unknown task");
            }
        }
        self.cancel_requests.insert(id.to_string());
        effects
    }

    /// Ids of every task that could still change state.
    pub fn live_ids(&self) -> Vec<String> {
        self.queue
            .iter()
            .map(|e| e.record.id.clone())
            .chain(self.running.keys().cloned())
            .chain(self.delayed.keys().cloned())
            .collect()
    }

    /// Drops everything. Running executors are signalled and their late
    /// settlement is ignored.
    pub fn clear(&mut self) {
        for entry in self
            .running
            .values()
            .chain(self.delayed.values())
            .chain(self.queue.iter())
        {
            entry.cancel.cancel();
        }
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    /// Queued tasks that can never be admitted, with the dependency ids
    /// they are still waiting on.
    pub fn stalled(&self) -> Vec<(String, Vec<String>)> {
        self.queue
            .iter()
            .map(|e| {
                let waiting = e
                    .record
                    .dependencies
                    .iter()
                    .filter(|d| self.terminal.get(*d) != Some(&TaskStatus::Completed))
                    .cloned()
                    .collect();
                (e.record.id.clone(), waiting)
            })
            .collect()
    }
}
