use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::driver::BatchDriver;
use crate::engine::{Classifier, ClassifierFactory};
use crate::error::SubmitError;
use crate::events::{EventSink, PipelineEvent};
use crate::retry::RetryingClassifier;
use crate::store::MemoryStore;
use crate::types::{Entry, Label, PipelineState, PipelineStatus, TaskSpec};

/// Events buffered per run for slow subscribers.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Aborted,
    Cancelled,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunState::Queued | RunState::Running)
    }
}

impl From<PipelineStatus> for RunState {
    fn from(status: PipelineStatus) -> Self {
        match status {
            PipelineStatus::Completed => RunState::Completed,
            PipelineStatus::Aborted => RunState::Aborted,
            PipelineStatus::Cancelled => RunState::Cancelled,
        }
    }
}

struct RunRecord {
    state: RunState,
    progress: PipelineState,
    store: Arc<MemoryStore>,
    classifier: Arc<dyn Classifier>,
    cancel: CancellationToken,
    events: broadcast::Sender<PipelineEvent>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn view(&self, id: Uuid) -> RunView {
        RunView {
            id,
            state: self.state,
            total_entries: self.store.len(),
            processed: self.progress.processed,
            failed: self.progress.failed,
            batches: self.progress.batches,
            created_at: self.created_at,
            finished_at: self.finished_at,
            results: self.state.is_finished().then(|| self.store.results()),
        }
    }
}

/// Serializable snapshot of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub id: Uuid,
    pub state: RunState,
    pub total_entries: usize,
    pub processed: usize,
    pub failed: usize,
    pub batches: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<HashMap<String, Label>>,
}

#[derive(Default)]
struct Runs {
    records: HashMap<Uuid, RunRecord>,
    /// Finished run ids, oldest first.
    finished: VecDeque<Uuid>,
}

/// Shared table of submitted runs.
///
/// Only the newest `max_finished_runs` finished runs are retained; queued and
/// running runs are never evicted.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<Runs>>,
    max_finished_runs: usize,
}

impl RunRegistry {
    pub fn new(max_finished_runs: usize) -> Self {
        Self {
            runs: Arc::default(),
            max_finished_runs,
        }
    }

    pub fn view(&self, id: Uuid) -> Option<RunView> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.records.get(&id).map(|record| record.view(id))
    }

    /// Snapshot plus a live event feed. The feed is `None` once the run has
    /// finished, since nothing more will be published.
    pub fn subscribe(
        &self,
        id: Uuid,
    ) -> Option<(RunView, Option<broadcast::Receiver<PipelineEvent>>)> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.records.get(&id).map(|record| {
            let feed = (!record.state.is_finished()).then(|| record.events.subscribe());
            (record.view(id), feed)
        })
    }

    /// Returns false when the id is unknown.
    pub fn cancel(&self, id: Uuid) -> bool {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        match runs.records.get(&id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, id: Uuid, store: Arc<MemoryStore>, classifier: Arc<dyn Classifier>) {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let record = RunRecord {
            state: RunState::Queued,
            progress: PipelineState::default(),
            store,
            classifier,
            cancel: CancellationToken::new(),
            events,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .insert(id, record);
    }

    fn mark_running(&self, id: Uuid) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = runs.records.get_mut(&id) {
            record.state = RunState::Running;
        }
    }

    /// Applies `event` to the run and publishes it to subscribers. Both happen
    /// under the write lock so a `subscribe` never misses the terminal event.
    fn record_event(&self, id: Uuid, event: &PipelineEvent) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = runs.records.get_mut(&id) else {
            return;
        };

        if let PipelineEvent::BatchComplete {
            total_processed,
            total_failed,
            ..
        } = event
        {
            record.progress.processed = *total_processed;
            record.progress.failed = *total_failed;
            record.progress.batches += 1;
        }
        let terminal = event.terminal_status();
        if let Some((status, state)) = terminal {
            record.state = status.into();
            record.progress = state;
            record.finished_at = Some(Utc::now());
        }
        // No subscribers is fine.
        let _ = record.events.send(event.clone());

        if terminal.is_some() {
            runs.finished.push_back(id);
            while runs.finished.len() > self.max_finished_runs {
                if let Some(evicted) = runs.finished.pop_front() {
                    runs.records.remove(&evicted);
                    tracing::debug!(run_id = %evicted, "Evicted finished run");
                }
            }
        }
    }

    fn handles(
        &self,
        id: Uuid,
    ) -> Option<(Arc<MemoryStore>, Arc<dyn Classifier>, CancellationToken)> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.records.get(&id).map(|record| {
            (
                record.store.clone(),
                record.classifier.clone(),
                record.cancel.clone(),
            )
        })
    }
}

/// Mirrors run events into the registry before forwarding them.
struct ProgressSink {
    id: Uuid,
    registry: RunRegistry,
    inner: Arc<dyn EventSink>,
}

impl EventSink for ProgressSink {
    fn emit(&self, event: &PipelineEvent) {
        self.registry.record_event(self.id, event);
        self.inner.emit(event);
    }
}

/// Submission side of the run queue.
#[derive(Clone)]
pub struct JobQueue {
    job_tx: flume::Sender<Uuid>,
    registry: RunRegistry,
    classifiers: Arc<dyn ClassifierFactory>,
}

impl JobQueue {
    pub fn new(
        classifiers: Arc<dyn ClassifierFactory>,
        config: JobConfig,
        events: Arc<dyn EventSink>,
    ) -> (Self, JobWorker) {
        let (job_tx, job_rx) = flume::unbounded();
        let registry = RunRegistry::new(config.max_finished_runs);

        let worker = JobWorker {
            job_rx,
            registry: registry.clone(),
            config,
            events,
        };

        (
            Self {
                job_tx,
                registry,
                classifiers,
            },
            worker,
        )
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Builds the run's classifier up front so a bad task is rejected before
    /// anything is queued.
    #[tracing::instrument(skip(self, entries, task), fields(entries = entries.len()))]
    pub fn submit(
        &self,
        entries: Vec<Entry>,
        task: Option<&TaskSpec>,
    ) -> Result<Uuid, SubmitError> {
        let classifier = self
            .classifiers
            .for_task(task)
            .map_err(SubmitError::InvalidTask)?;

        let id = Uuid::new_v4();
        self.registry
            .insert(id, Arc::new(MemoryStore::new(entries)), classifier);
        self.job_tx.send(id).map_err(|_| SubmitError::QueueClosed)?;
        tracing::info!(run_id = %id, custom_task = task.is_some(), "Run queued");
        Ok(id)
    }
}

/// Executes queued runs one at a time.
pub struct JobWorker {
    job_rx: flume::Receiver<Uuid>,
    registry: RunRegistry,
    config: JobConfig,
    events: Arc<dyn EventSink>,
}

impl JobWorker {
    /// Returns once every `JobQueue` handle has been dropped.
    pub async fn run_forever(self) {
        while let Ok(id) = self.job_rx.recv_async().await {
            self.run_job(id).await;
        }
        tracing::info!("Job queue closed, worker exiting");
    }

    #[tracing::instrument(skip(self))]
    async fn run_job(&self, id: Uuid) {
        let Some((store, classifier, cancel)) = self.registry.handles(id) else {
            tracing::warn!("Queued run missing from registry");
            return;
        };

        let events: Arc<dyn EventSink> = Arc::new(ProgressSink {
            id,
            registry: self.registry.clone(),
            inner: self.events.clone(),
        });

        if cancel.is_cancelled() {
            tracing::info!("Run cancelled before start");
            events.emit(&PipelineEvent::PipelineCancelled {
                state: PipelineState::default(),
            });
            return;
        }

        self.registry.mark_running(id);
        tracing::info!(entries = store.len(), "Run started");

        let classifier =
            RetryingClassifier::new(classifier, self.config.retry.clone(), events.clone());
        let driver = BatchDriver::new(classifier, store, self.config.pipeline.clone(), events);

        // The terminal event has already updated the registry.
        let report = driver.run(PipelineState::default(), &cancel).await;
        tracing::debug!(status = report.status.as_str(), "Run finished");
    }
}
