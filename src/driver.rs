use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::{Classifier, EntryStore};
use crate::events::{EventSink, PipelineEvent};
use crate::retry::RetryingClassifier;
use crate::types::{BatchOutcome, PipelineReport, PipelineState, PipelineStatus};

/// Walks the store batch by batch, classifying entries sequentially.
pub struct BatchDriver<C, S> {
    classifier: RetryingClassifier<C>,
    store: S,
    config: PipelineConfig,
    events: Arc<dyn EventSink>,
}

impl<C: Classifier, S: EntryStore> BatchDriver<C, S> {
    pub fn new(
        classifier: RetryingClassifier<C>,
        store: S,
        config: PipelineConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            classifier,
            store,
            config,
            events,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs until the input is exhausted, the consecutive batch failure
    /// ceiling is hit, or `cancel` fires at a batch boundary.
    #[tracing::instrument(skip_all, fields(batch_size = self.config.batch_size))]
    pub async fn run(
        &self,
        mut state: PipelineState,
        cancel: &CancellationToken,
    ) -> PipelineReport {
        let mut offset = 0;
        // Pacing applies between any two classifications of the run, across batches.
        let mut paced = false;

        loop {
            if cancel.is_cancelled() {
                return self.finish(PipelineStatus::Cancelled, state);
            }

            let batch = state.batches + 1;
            tracing::debug!(batch, offset, "Starting batch");

            match self.process_batch(offset, &mut paced).await {
                Ok(None) => return self.finish(PipelineStatus::Completed, state),
                Ok(Some((outcome, fetched))) => {
                    state.merge(&outcome);
                    offset += fetched;
                    self.events.emit(&PipelineEvent::BatchComplete {
                        batch,
                        succeeded: outcome.succeeded,
                        failed: outcome.failed,
                        total_processed: state.processed,
                        total_failed: state.failed,
                    });
                }
                Err(err) => {
                    state.consecutive_batch_failures += 1;
                    let ceiling = self.config.max_consecutive_batch_failures;
                    self.events.emit(&PipelineEvent::BatchFailed {
                        batch,
                        consecutive: state.consecutive_batch_failures,
                        ceiling,
                        error: format!("{err:#}"),
                    });

                    if state.consecutive_batch_failures >= ceiling {
                        return self.finish(PipelineStatus::Aborted, state);
                    }

                    tracing::info!(
                        delay_ms = self.config.batch_retry_delay.as_millis() as u64,
                        "Waiting before retrying batch"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.finish(PipelineStatus::Cancelled, state);
                        }
                        _ = tokio::time::sleep(self.config.batch_retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Returns `None` once the store has nothing left at `offset`.
    async fn process_batch(
        &self,
        offset: usize,
        paced: &mut bool,
    ) -> Result<Option<(BatchOutcome, usize)>> {
        let batch_start = Instant::now();
        let entries = self
            .store
            .fetch_batch(offset, self.config.batch_size)
            .await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut outcome = BatchOutcome::default();
        let mut labels = Vec::with_capacity(entries.len());

        for entry in &entries {
            if *paced {
                tokio::time::sleep(self.classifier.pacing_delay()).await;
            }
            *paced = true;
            let result = self.classifier.classify_entry(entry).await;
            outcome.record(&result);
            if let Some(label) = result.label() {
                labels.push((entry.id.clone(), label.clone()));
            }
        }

        if !labels.is_empty() {
            self.store.store_results(&labels).await?;
        }

        tracing::debug!(
            processing_time_ms = batch_start.elapsed().as_millis() as u64,
            "Batch processed"
        );
        Ok(Some((outcome, entries.len())))
    }

    fn finish(&self, status: PipelineStatus, state: PipelineState) -> PipelineReport {
        let event = match status {
            PipelineStatus::Completed => PipelineEvent::PipelineComplete { state },
            PipelineStatus::Aborted => PipelineEvent::PipelineAborted { state },
            PipelineStatus::Cancelled => PipelineEvent::PipelineCancelled { state },
        };
        self.events.emit(&event);
        PipelineReport { status, state }
    }
}
