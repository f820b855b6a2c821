use std::time::Duration;

/// Failure of a single classification call.
///
/// Every variant is treated as transient by the retry wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classification call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by classification service")]
    RateLimited,

    #[error("classification service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ClassifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClassifyError::Malformed(err.to_string())
        } else {
            ClassifyError::Transport(err.to_string())
        }
    }
}

/// Why a run could not be queued.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid task: {0:#}")]
    InvalidTask(anyhow::Error),

    #[error("job queue is closed")]
    QueueClosed,
}
