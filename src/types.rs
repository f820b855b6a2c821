use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of input text, identified by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub text: String,
}

impl Entry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-run label set and prompt, overriding the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskSpec {
    pub labels: Vec<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub fallback_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub attempts: u32,
    pub last_error: String,
}

/// Outcome of classifying one entry after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationResult {
    Classified(Label),
    Failed(FailureReason),
}

impl ClassificationResult {
    pub fn label(&self) -> Option<&Label> {
        match self {
            ClassificationResult::Classified(label) => Some(label),
            ClassificationResult::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn record(&mut self, result: &ClassificationResult) {
        match result {
            ClassificationResult::Classified(_) => self.succeeded += 1,
            ClassificationResult::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Running totals for one pipeline run.
///
/// `processed` counts every entry that went through the wrapper, including
/// the ones that ended up skipped; `failed` is the skipped subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub processed: usize,
    pub failed: usize,
    pub consecutive_batch_failures: u32,
    pub batches: usize,
}

impl PipelineState {
    pub fn succeeded(&self) -> usize {
        self.processed - self.failed
    }

    pub fn merge(&mut self, outcome: &BatchOutcome) {
        self.processed += outcome.total();
        self.failed += outcome.failed;
        self.batches += 1;
        self.consecutive_batch_failures = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Aborted,
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Completed => "completed",
            PipelineStatus::Aborted => "aborted",
            PipelineStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub state: PipelineState,
}
