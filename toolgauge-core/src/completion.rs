//! Text-completion capability consumed by the batch enhancer.
//!
//! A missing credential is a first-class non-error state: configuration
//! without an API key yields no client at all, and callers treat that as
//! "enhancement unavailable" rather than a failure.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value as JsonValue;

/// Errors from the completion capability. All of them put the caller on the
/// fallback path; none are surfaced to the end consumer.
#[derive(Clone, Debug)]
pub enum CompletionError {
    /// The HTTP request itself failed.
    Request(String),
    /// The service answered with a non-success status.
    Status { code: u16, body: String },
    /// The response body did not carry completion text.
    MalformedResponse(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::Request(message) => write!(f, "completion request failed: {message}"),
            CompletionError::Status { code, body } => {
                write!(f, "completion service returned {code}: {body}")
            }
            CompletionError::MalformedResponse(message) => {
                write!(f, "malformed completion response: {message}")
            }
        }
    }
}

impl std::error::Error for CompletionError {}

/// One completion request.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: String,
    pub temperature: f32,
}

pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>>;

/// Capability contract: `complete(prompt, system, temperature) -> text`.
pub trait CompletionClient: Send + Sync {
    fn complete<'a>(&'a self, request: CompletionRequest) -> CompletionFuture<'a>;
}

/// Configuration for the shipped chat-completions client.
#[derive(Clone, Debug, Default)]
pub struct CompletionConfig {
    /// API key; absence disables enhancement without error.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Endpoint override for OpenAI-compatible services.
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Builds a client, or `None` when no API key is configured.
    pub fn from_config(config: &CompletionConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .ok()?;
        Some(Self {
            http,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPLETIONS_URL.to_string()),
            model: config.model.clone(),
            api_key,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> JsonValue {
        serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        })
    }
}

impl CompletionClient for ChatCompletionsClient {
    fn complete<'a>(&'a self, request: CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(async move {
            let response = self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&self.request_body(&request))
                .send()
                .await
                .map_err(|error| CompletionError::Request(error.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|error| CompletionError::Request(error.to_string()))?;
            if !status.is_success() {
                return Err(CompletionError::Status {
                    code: status.as_u16(),
                    body,
                });
            }
            extract_completion_text(&body)
        })
    }
}

fn extract_completion_text(body: &str) -> Result<String, CompletionError> {
    let payload: JsonValue = serde_json::from_str(body)
        .map_err(|error| CompletionError::MalformedResponse(error.to_string()))?;
    payload
        .pointer("/choices/0/message/content")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CompletionError::MalformedResponse("response carries no message content".to_string())
        })
}
