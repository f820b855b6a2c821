use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::{Classifier, ClassifierFactory};
use crate::error::ClassifyError;
use crate::types::{Label, TaskSpec};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub labels: Vec<String>,
    pub fallback_label: Option<String>,
    pub instructions: Option<String>,
}

impl From<&Config> for OpenAiConfig {
    fn from(config: &Config) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            labels: config.parse_labels(),
            fallback_label: config.fallback_label.clone(),
            instructions: config.instructions.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Single-label classifier over an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    labels: Vec<String>,
    fallback_label: Option<Label>,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        if config.labels.is_empty() {
            anyhow::bail!("At least one label is required");
        }
        let client = reqwest::Client::builder().build()?;
        let system_prompt = config
            .instructions
            .unwrap_or_else(|| default_instructions(&config.labels));

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
            system_prompt,
            labels: config.labels,
            fallback_label: config.fallback_label.map(Label::new),
        })
    }

    /// Same endpoint and client, with the task's labels and prompt.
    pub fn with_task(&self, task: &TaskSpec) -> anyhow::Result<Self> {
        let labels: Vec<String> = task
            .labels
            .iter()
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect();
        if labels.is_empty() {
            anyhow::bail!("Task must name at least one label");
        }
        let system_prompt = task
            .instructions
            .clone()
            .unwrap_or_else(|| default_instructions(&labels));

        Ok(Self {
            system_prompt,
            labels,
            fallback_label: task.fallback_label.as_deref().map(Label::new),
            ..self.clone()
        })
    }

    fn parse_label(&self, raw: &str) -> Result<Label, ClassifyError> {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace())
            .to_lowercase();
        if cleaned.is_empty() {
            return Err(ClassifyError::Malformed("empty completion".into()));
        }
        if self.labels.iter().any(|label| *label == cleaned) {
            return Ok(Label::new(cleaned));
        }
        match &self.fallback_label {
            Some(fallback) => {
                tracing::debug!(
                    answer = %cleaned,
                    fallback = %fallback,
                    "Label outside allowed set, using fallback"
                );
                Ok(fallback.clone())
            }
            None => Err(ClassifyError::Malformed(format!(
                "label {cleaned:?} is not one of {:?}",
                self.labels
            ))),
        }
    }
}

fn default_instructions(labels: &[String]) -> String {
    let options = labels
        .iter()
        .map(|label| format!("- {label}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a linguistic classifier for a lexicon.\n\
         Classify the single word or expression given by the user.\n\n\
         Return ONLY ONE of these labels:\n{options}\n\n\
         Do not explain your answer and do not add quotation marks."
    )
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    #[tracing::instrument(skip(self, text), fields(model = %self.model))]
    async fn classify(&self, text: &str) -> Result<Label, ClassifyError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifyError::Malformed("response has no completion".into()))?;

        self.parse_label(&content)
    }
}

impl ClassifierFactory for OpenAiClassifier {
    fn for_task(&self, task: Option<&TaskSpec>) -> anyhow::Result<Arc<dyn Classifier>> {
        Ok(match task {
            Some(task) => Arc::new(self.with_task(task)?),
            None => Arc::new(self.clone()),
        })
    }
}
