use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::env;
use std::thread;
use std::time::Duration;

use crate::logger::{preview, Logger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ChatMessage {
    pub(crate) role: String,
    pub(crate) content: String,
}

impl ChatMessage {
    pub(crate) fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub(crate) fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Plain text in, plain text out. No streaming, no tool calls.
pub(crate) trait LlmClient {
    fn query(&self, messages: &[ChatMessage]) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub(crate) struct LlmSettings {
    pub(crate) endpoint: String,
    pub(crate) model: String,
    pub(crate) api_key_env: String,
    pub(crate) timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) backoff: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub(crate) struct ChatCompletionsClient<'a> {
    client: Client,
    settings: LlmSettings,
    api_key: String,
    logger: &'a Logger,
}

impl<'a> ChatCompletionsClient<'a> {
    /// Returns `Ok(None)` when the API key variable is unset or empty; the
    /// caller then runs without a model.
    pub(crate) fn from_env(settings: LlmSettings, logger: &'a Logger) -> Result<Option<Self>, String> {
        let api_key = env::var(&settings.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Ok(None);
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| format!("Failed to build HTTP client: {}", err))?;
        Ok(Some(Self {
            client,
            settings,
            api_key,
            logger,
        }))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.settings.backoff.saturating_mul(1u32 << attempt.min(16))
    }

    fn send_once(&self, messages: &[ChatMessage]) -> Result<Attempt, String> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages,
        };
        let response = match self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
        {
            Ok(response) => response,
            Err(err) => return Ok(Attempt::Retry(format!("network error: {}", err))),
        };

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| format!("Failed to read model response body: {}", err))?;
        if !status.is_success() {
            let message = format!("HTTP {} - {}", status, preview(&body, 500));
            if is_retryable(status) {
                return Ok(Attempt::Retry(message));
            }
            return Err(format!("Model request failed: {}", message));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|err| format!("Failed to parse model response: {}", err))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(Attempt::Done(content))
    }
}

enum Attempt {
    Done(String),
    Retry(String),
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

impl LlmClient for ChatCompletionsClient<'_> {
    fn query(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let total = self.settings.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 0..total {
            match self.send_once(messages)? {
                Attempt::Done(content) => {
                    self.logger.event(
                        "llm response",
                        &[
                            ("model", &self.settings.model),
                            ("chars", &content.len().to_string()),
                        ],
                    );
                    return Ok(content);
                }
                Attempt::Retry(message) => {
                    last_error = message;
                    if attempt + 1 == total {
                        break;
                    }
                    let delay = self.retry_delay(attempt);
                    eprintln!(
                        "Model request failed ({}), retrying in {}s (attempt {}/{})",
                        last_error,
                        delay.as_secs_f32(),
                        attempt + 1,
                        self.settings.max_retries
                    );
                    self.logger.event(
                        "llm retry",
                        &[
                            ("attempt", &(attempt + 1).to_string()),
                            ("error", &last_error),
                        ],
                    );
                    thread::sleep(delay);
                }
            }
        }
        Err(format!(
            "Model request failed after {} retries: {}",
            self.settings.max_retries, last_error
        ))
    }
}
