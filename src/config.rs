use clap::Parser;
use std::time::Duration;

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of entries fetched and reported per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "500")]
    pub batch_size: usize,

    /// Classification attempts per entry before it is skipped
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "5")]
    pub max_attempts: u32,

    /// Timeout for a single classification call, in seconds
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value = "30")]
    pub call_timeout_secs: u64,

    /// Delay between consecutive entries, in milliseconds
    #[arg(long, env = "PACING_DELAY_MS", default_value = "50")]
    pub pacing_delay_ms: u64,

    /// Delay before retrying a failed batch, in seconds
    #[arg(long, env = "BATCH_RETRY_DELAY_SECS", default_value = "5")]
    pub batch_retry_delay_secs: u64,

    /// Consecutive batch failures tolerated before the run aborts
    #[arg(long, env = "MAX_CONSECUTIVE_BATCH_FAILURES", default_value = "3")]
    pub max_consecutive_batch_failures: u32,

    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "67108864")]
    pub max_body_bytes: usize,

    /// Finished runs kept for status queries before the oldest are evicted
    #[arg(long, env = "MAX_FINISHED_RUNS", default_value = "100")]
    pub max_finished_runs: usize,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    /// API key sent as a bearer token
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Chat model used for classification
    #[arg(long, env = "MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Allowed labels, comma separated
    #[arg(
        long,
        env = "LABELS",
        default_value = "formal,neutral,informal,slang,archaic"
    )]
    pub labels: String,

    /// Label returned when the model answers outside the allowed set
    #[arg(long, env = "FALLBACK_LABEL")]
    pub fallback_label: Option<String>,

    /// System prompt; generated from the label set when omitted
    #[arg(long, env = "INSTRUCTIONS")]
    pub instructions: Option<String>,
}

// Hand-written so the API key never reaches the logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("batch_size", &self.batch_size)
            .field("max_attempts", &self.max_attempts)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("pacing_delay_ms", &self.pacing_delay_ms)
            .field("batch_retry_delay_secs", &self.batch_retry_delay_secs)
            .field(
                "max_consecutive_batch_failures",
                &self.max_consecutive_batch_failures,
            )
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_finished_runs", &self.max_finished_runs)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("labels", &self.labels)
            .field("fallback_label", &self.fallback_label)
            .finish_non_exhaustive()
    }
}

/// Settings for the per-entry retry wrapper.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    /// Scale of the backoff curve; one second gives `2^n + 0.1n` seconds.
    pub backoff_unit: Duration,
    pub pacing_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Duration::from_secs(30),
            backoff_unit: Duration::from_secs(1),
            pacing_delay: Duration::from_millis(50),
        }
    }
}

impl From<&Config> for RetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            pacing_delay: Duration::from_millis(config.pacing_delay_ms),
            ..Default::default()
        }
    }
}

/// Settings for the batch driver.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_retry_delay: Duration,
    pub max_consecutive_batch_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_retry_delay: Duration::from_secs(5),
            max_consecutive_batch_failures: 3,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_retry_delay: Duration::from_secs(config.batch_retry_delay_secs),
            max_consecutive_batch_failures: config.max_consecutive_batch_failures,
        }
    }
}

/// Settings for the run queue and its registry.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub max_finished_runs: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            max_finished_runs: 100,
        }
    }
}

impl From<&Config> for JobConfig {
    fn from(config: &Config) -> Self {
        Self {
            retry: RetryConfig::from(config),
            pipeline: PipelineConfig::from(config),
            max_finished_runs: config.max_finished_runs,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("--batch-size must be at least 1");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be at least 1");
        }
        if self.max_consecutive_batch_failures == 0 {
            anyhow::bail!("--max-consecutive-batch-failures must be at least 1");
        }
        if self.max_finished_runs == 0 {
            anyhow::bail!("--max-finished-runs must be at least 1");
        }
        if self.parse_labels().is_empty() {
            anyhow::bail!("--labels must name at least one label");
        }
        Ok(())
    }

    pub fn parse_labels(&self) -> Vec<String> {
        self.labels
            .split(',')
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
