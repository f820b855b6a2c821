use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::EntryStore;
use crate::types::{Entry, Label};

/// `EntryStore` over a fixed list of entries, collecting labels in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<Entry>,
    results: Mutex<HashMap<String, Label>>,
}

impl MemoryStore {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            results: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels stored so far, keyed by entry id.
    pub fn results(&self) -> HashMap<String, Label> {
        self.results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entry>> {
        let start = offset.min(self.entries.len());
        let end = offset.saturating_add(limit).min(self.entries.len());
        Ok(self.entries[start..end].to_vec())
    }

    async fn store_results(&self, results: &[(String, Label)]) -> Result<()> {
        let mut stored = self
            .results
            .lock()
            .map_err(|_| anyhow!("result map poisoned"))?;
        for (id, label) in results {
            stored.insert(id.clone(), label.clone());
        }
        Ok(())
    }
}
