//! Scripted collaborators shared by the unit tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{Classifier, EntryStore};
use crate::error::ClassifyError;
use crate::events::{EventSink, PipelineEvent};
use crate::store::MemoryStore;
use crate::types::{Entry, Label};

/// Returns a fixed label, failing the first `n` calls for selected texts.
pub struct ScriptedClassifier {
    label: Label,
    failures: Mutex<HashMap<String, u32>>,
    latency: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new(label: &str) -> Self {
        Self {
            label: Label::new(label),
            failures: Mutex::new(HashMap::new()),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_times(self, text: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(text.to_string(), times);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == text).count()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> Result<Label, ClassifyError> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(text) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClassifyError::RateLimited);
            }
        }
        Ok(self.label.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_count(&self, entry: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, PipelineEvent::RetryAttempt { entry_id, .. } if entry_id == entry)
            })
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, PipelineEvent::EntrySkipped { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Wraps a `MemoryStore` and fails the fetch or store calls whose index is listed.
pub struct FlakyStore {
    inner: MemoryStore,
    failing_fetches: HashSet<usize>,
    failing_stores: HashSet<usize>,
    fail_all: bool,
    fetches: Mutex<usize>,
    stores: Mutex<usize>,
}

impl FlakyStore {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            inner: MemoryStore::new(entries),
            failing_fetches: HashSet::new(),
            failing_stores: HashSet::new(),
            fail_all: false,
            fetches: Mutex::new(0),
            stores: Mutex::new(0),
        }
    }

    /// Zero-based indices of fetch calls that return an error.
    pub fn fail_fetches(mut self, calls: &[usize]) -> Self {
        self.failing_fetches.extend(calls.iter().copied());
        self
    }

    /// Zero-based indices of `store_results` calls that return an error.
    pub fn fail_stores(mut self, calls: &[usize]) -> Self {
        self.failing_stores.extend(calls.iter().copied());
        self
    }

    pub fn always_fail(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }

    pub fn results(&self) -> HashMap<String, Label> {
        self.inner.results()
    }
}

#[async_trait]
impl EntryStore for FlakyStore {
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entry>> {
        let call = {
            let mut fetches = self.fetches.lock().unwrap();
            *fetches += 1;
            *fetches - 1
        };
        if self.fail_all || self.failing_fetches.contains(&call) {
            bail!("connection reset while fetching batch at offset {offset}");
        }
        self.inner.fetch_batch(offset, limit).await
    }

    async fn store_results(&self, results: &[(String, Label)]) -> Result<()> {
        let call = {
            let mut stores = self.stores.lock().unwrap();
            *stores += 1;
            *stores - 1
        };
        if self.failing_stores.contains(&call) {
            bail!("deadlock detected while committing {} results", results.len());
        }
        self.inner.store_results(results).await
    }
}

pub fn entries(n: usize) -> Vec<Entry> {
    (1..=n)
        .map(|i| Entry::new(format!("entry-{i}"), format!("word{i}")))
        .collect()
}
