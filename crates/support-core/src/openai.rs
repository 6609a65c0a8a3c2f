//! Client for OpenAI-compatible chat completion endpoints (OpenRouter by default),
//! and the wire types of the tool-calling protocol.
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Exponential backoff between retried completion requests, with up to 25% jitter.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u128.checked_shl(retry).unwrap_or(u128::MAX);
        let ms = self
            .initial
            .as_millis()
            .saturating_mul(factor)
            .min(self.max.as_millis()) as u64;
        Duration::from_millis(ms.saturating_add(jitter_ms((ms / 4).max(1))))
    }
}

fn jitter_ms(max_inclusive: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % (max_inclusive + 1)
}

/// Model endpoint settings.
///
/// - `OPENAI_BASE_URL` (default OpenRouter)
/// - `OPENAI_API_KEY`, falling back to `OPENROUTER_API_KEY`
/// - `OPENAI_TIMEOUT_SECS` (30), `OPENAI_MAX_RETRIES` (3)
/// - `OPENAI_RETRY_INITIAL_MS` (200), `OPENAI_RETRY_MAX_MS` (5000)
/// - `OPENAI_MAX_ERROR_BODY_BYTES` (8 KiB)
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub error_body_limit: usize,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn num<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
            lookup(key)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(default)
        }

        let base_url = lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = lookup("OPENAI_API_KEY")
            .or_else(|| lookup("OPENROUTER_API_KEY"))
            .filter(|key| !key.trim().is_empty());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(num(&lookup, "OPENAI_TIMEOUT_SECS", 30)),
            max_retries: num(&lookup, "OPENAI_MAX_RETRIES", 3),
            backoff: Backoff {
                initial: Duration::from_millis(num(&lookup, "OPENAI_RETRY_INITIAL_MS", 200)),
                max: Duration::from_millis(num(&lookup, "OPENAI_RETRY_MAX_MS", 5_000)),
            },
            error_body_limit: num(&lookup, "OPENAI_MAX_ERROR_BODY_BYTES", 8 * 1024),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("model endpoint error {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("model endpoint error {status}: {body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("model reply has no choices")]
    EmptyChoices,
}

impl ModelError {
    /// Timeouts, transport failures, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Request(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            ModelError::Upstream { status, .. } | ModelError::UpstreamBody { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ModelError::InvalidJson(_) | ModelError::EmptyChoices => false,
        }
    }
}

/// Anything that can answer a chat completion request.
///
/// The HTTP client is the production implementation; tests drive the dispatch
/// loop with scripted replies.
pub trait ChatModel: Send + Sync {
    fn complete(
        &self,
        request: ChatCompletionRequest,
    ) -> impl Future<Output = Result<ChatCompletionResponse, ModelError>> + Send;
}

#[derive(Clone)]
pub struct OpenAiClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("support-core/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POST `/chat/completions`, retrying transient failures up to `max_retries` times.
    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ModelError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut retry = 0;
        loop {
            match self.send_once(&url, request).await {
                Ok(response) => return Ok(response),
                Err(e) if retry < self.config.max_retries && e.is_transient() => {
                    let delay = self.config.backoff.delay(retry);
                    retry += 1;
                    warn!(retry, delay_ms = delay.as_millis(), error = %e, "chat completion failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ModelError> {
        let mut builder = self.http.post(url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        debug!(status = status.as_u16(), model = %request.model, "chat completion response");
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let body = error_body(resp, self.config.error_body_limit).await;
        Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => ModelError::Upstream {
                status,
                message: envelope
                    .error
                    .message
                    .unwrap_or_else(|| "no message".to_string()),
            },
            Err(_) => ModelError::UpstreamBody { status, body },
        })
    }
}

impl ChatModel for OpenAiClient {
    async fn complete(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ModelError> {
        self.chat_completions(&request).await
    }
}

/// At most `limit` bytes of an error body, lossily decoded.
async fn error_body(resp: reqwest::Response, limit: usize) -> String {
    match resp.bytes().await {
        Ok(bytes) => String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]).into_owned(),
        Err(e) => {
            warn!(error = %e, "failed to read model error body");
            String::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Option<ChatCompletionUsage>,
}

impl ChatCompletionResponse {
    pub fn into_message(self) -> Result<Message, ModelError> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ModelError::EmptyChoices)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: Option<u32>,
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}
