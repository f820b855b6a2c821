use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::engine::Classifier;
use crate::error::ClassifyError;
use crate::events::{EventSink, PipelineEvent};
use crate::types::{ClassificationResult, Entry, FailureReason, Label};

/// Wait before the attempt following zero-based `attempt`: `unit * (2^n + 0.1n)`.
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    let n = attempt.min(30) as f64;
    unit.mul_f64(2f64.powf(n) + 0.1 * n)
}

/// Bounded retry with exponential backoff around a single classification call.
pub struct RetryingClassifier<C> {
    classifier: C,
    config: RetryConfig,
    events: Arc<dyn EventSink>,
}

impl<C: Classifier> RetryingClassifier<C> {
    pub fn new(classifier: C, config: RetryConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            classifier,
            config,
            events,
        }
    }

    /// Delay the driver inserts between consecutive entries.
    pub fn pacing_delay(&self) -> Duration {
        self.config.pacing_delay
    }

    /// Never fails: exhausted retries come back as `ClassificationResult::Failed`.
    #[tracing::instrument(skip(self, entry), fields(entry_id = %entry.id))]
    pub async fn classify_entry(&self, entry: &Entry) -> ClassificationResult {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match self.attempt(&entry.text).await {
                Ok(label) => {
                    if attempt > 0 {
                        tracing::debug!(
                            attempts = attempt + 1,
                            "Classification succeeded after retry"
                        );
                    }
                    return ClassificationResult::Classified(label);
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt + 1 < max_attempts {
                        let delay = backoff_delay(self.config.backoff_unit, attempt);
                        self.events.emit(&PipelineEvent::RetryAttempt {
                            entry_id: entry.id.clone(),
                            attempt,
                            max_attempts,
                            delay,
                            error: last_error.clone(),
                        });
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.events.emit(&PipelineEvent::EntrySkipped {
            entry_id: entry.id.clone(),
            attempts: max_attempts,
            error: last_error.clone(),
        });
        ClassificationResult::Failed(FailureReason {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, text: &str) -> Result<Label, ClassifyError> {
        let timeout = self.config.call_timeout;
        match tokio::time::timeout(timeout, self.classifier.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifyError::Timeout(timeout)),
        }
    }
}
