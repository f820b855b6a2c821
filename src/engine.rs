use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ClassifyError;
use crate::types::{Entry, Label, TaskSpec};

/// External classification service: text in, one label out.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Label, ClassifyError>;
}

/// Builds the classifier for one run, honouring an optional task override.
pub trait ClassifierFactory: Send + Sync {
    fn for_task(&self, task: Option<&TaskSpec>) -> Result<Arc<dyn Classifier>>;
}

/// Serves every run with the same classifier; task overrides are rejected.
pub struct FixedClassifier(pub Arc<dyn Classifier>);

impl ClassifierFactory for FixedClassifier {
    fn for_task(&self, task: Option<&TaskSpec>) -> Result<Arc<dyn Classifier>> {
        if task.is_some() {
            anyhow::bail!("This classifier does not accept task overrides");
        }
        Ok(self.0.clone())
    }
}

/// Ordered entry source that also persists labels.
///
/// Errors from either method are batch-level failures.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Returns up to `limit` entries starting at `offset`. An empty vec means
    /// the input is exhausted.
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entry>>;

    async fn store_results(&self, results: &[(String, Label)]) -> Result<()>;
}

#[async_trait]
impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    async fn classify(&self, text: &str) -> Result<Label, ClassifyError> {
        (**self).classify(text).await
    }
}

#[async_trait]
impl<T: EntryStore + ?Sized> EntryStore for Arc<T> {
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entry>> {
        (**self).fetch_batch(offset, limit).await
    }

    async fn store_results(&self, results: &[(String, Label)]) -> Result<()> {
        (**self).store_results(results).await
    }
}
