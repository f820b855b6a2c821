use metrics::counter;
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::types::{PipelineState, PipelineStatus};

/// Observable milestones of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RetryAttempt {
        entry_id: String,
        /// Zero-based index of the attempt that just failed.
        attempt: u32,
        max_attempts: u32,
        #[serde(rename = "delay_ms", serialize_with = "as_millis")]
        delay: Duration,
        error: String,
    },
    EntrySkipped {
        entry_id: String,
        attempts: u32,
        error: String,
    },
    BatchComplete {
        batch: usize,
        succeeded: usize,
        failed: usize,
        total_processed: usize,
        total_failed: usize,
    },
    BatchFailed {
        batch: usize,
        consecutive: u32,
        ceiling: u32,
        error: String,
    },
    PipelineComplete {
        state: PipelineState,
    },
    PipelineAborted {
        state: PipelineState,
    },
    PipelineCancelled {
        state: PipelineState,
    },
}

impl PipelineEvent {
    /// Wire name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::RetryAttempt { .. } => "retry_attempt",
            PipelineEvent::EntrySkipped { .. } => "entry_skipped",
            PipelineEvent::BatchComplete { .. } => "batch_complete",
            PipelineEvent::BatchFailed { .. } => "batch_failed",
            PipelineEvent::PipelineComplete { .. } => "pipeline_complete",
            PipelineEvent::PipelineAborted { .. } => "pipeline_aborted",
            PipelineEvent::PipelineCancelled { .. } => "pipeline_cancelled",
        }
    }

    /// The terminal status this event reports, if it ends the run.
    pub fn terminal_status(&self) -> Option<(PipelineStatus, PipelineState)> {
        match self {
            PipelineEvent::PipelineComplete { state } => Some((PipelineStatus::Completed, *state)),
            PipelineEvent::PipelineAborted { state } => Some((PipelineStatus::Aborted, *state)),
            PipelineEvent::PipelineCancelled { state } => Some((PipelineStatus::Cancelled, *state)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_status().is_some()
    }
}

fn as_millis<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(delay.as_millis() as u64)
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Logs events through `tracing` and counts them with `metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RetryAttempt {
                entry_id,
                attempt,
                max_attempts,
                delay,
                error,
            } => {
                counter!("classifier_retries_total").increment(1);
                tracing::warn!(
                    entry_id = %entry_id,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Classification attempt failed, retrying"
                );
            }
            PipelineEvent::EntrySkipped {
                entry_id,
                attempts,
                error,
            } => {
                counter!("entries_skipped_total").increment(1);
                tracing::warn!(
                    entry_id = %entry_id,
                    attempts,
                    error = %error,
                    "Retries exhausted, skipping entry"
                );
            }
            PipelineEvent::BatchComplete {
                batch,
                succeeded,
                failed,
                total_processed,
                total_failed,
            } => {
                counter!("entries_classified_total").increment(*succeeded as u64);
                tracing::info!(
                    batch,
                    succeeded,
                    failed,
                    total_processed,
                    total_failed,
                    "Batch complete"
                );
            }
            PipelineEvent::BatchFailed {
                batch,
                consecutive,
                ceiling,
                error,
            } => {
                counter!("batch_failures_total").increment(1);
                tracing::error!(batch, consecutive, ceiling, error = %error, "Batch failed");
            }
            PipelineEvent::PipelineComplete { state } => {
                record_run(PipelineStatus::Completed);
                tracing::info!(
                    processed = state.processed,
                    failed = state.failed,
                    batches = state.batches,
                    "Pipeline complete"
                );
            }
            PipelineEvent::PipelineAborted { state } => {
                record_run(PipelineStatus::Aborted);
                tracing::error!(
                    processed = state.processed,
                    failed = state.failed,
                    consecutive_batch_failures = state.consecutive_batch_failures,
                    "Too many consecutive batch failures, pipeline aborted"
                );
            }
            PipelineEvent::PipelineCancelled { state } => {
                record_run(PipelineStatus::Cancelled);
                tracing::info!(
                    processed = state.processed,
                    failed = state.failed,
                    "Pipeline cancelled"
                );
            }
        }
    }
}

fn record_run(status: PipelineStatus) {
    counter!("pipeline_runs_total", "status" => status.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_type_tag() {
        let event = PipelineEvent::RetryAttempt {
            entry_id: "entry-1".into(),
            attempt: 0,
            max_attempts: 5,
            delay: Duration::from_millis(2100),
            error: "rate limited".into(),
        };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], event.kind());
        assert_eq!(value["delay_ms"], 2100);
        assert_eq!(value["entry_id"], "entry-1");
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_events_carry_state() {
        let state = PipelineState {
            processed: 4,
            failed: 1,
            ..Default::default()
        };
        let event = PipelineEvent::PipelineAborted { state };

        assert_eq!(
            event.terminal_status(),
            Some((PipelineStatus::Aborted, state))
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "pipeline_aborted",
                "state": {
                    "processed": 4,
                    "failed": 1,
                    "consecutive_batch_failures": 0,
                    "batches": 0
                }
            })
        );
    }
}
