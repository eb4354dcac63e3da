//! Common types and traits for all model backends.
//!
//! [`Model`] is the only interface the agent loop sees: a blocking
//! `generate` and a streaming `generate_stream`, both taking the canonical
//! message list plus [`GenerateOptions`]. Retry and rate limiting compose
//! around implementations rather than living inside them.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::{ChatMessage, ChatMessageStreamDelta, ChatMessageToolCall};
use crate::monitor::TokenUsage;
use crate::tool::ToolDefinition;

/// One completed model generation: the message plus its accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The message the model produced.
    pub message: ChatMessage,
    /// Tokens spent on this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// The backend's raw response body, kept for debugging.
    #[serde(skip)]
    pub raw: Option<serde_json::Value>,
}

impl ModelResponse {
    /// Wrap a message as a response without accounting.
    #[must_use]
    pub const fn new(message: ChatMessage) -> Self {
        Self {
            message,
            token_usage: None,
            raw: None,
        }
    }

    /// Attach token accounting.
    #[must_use]
    pub const fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Attach the raw response body.
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Text content of the produced message.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.message.text_content()
    }

    /// Structured tool calls carried by the produced message.
    #[must_use]
    pub fn tool_calls(&self) -> Option<&[ChatMessageToolCall]> {
        self.message.tool_calls.as_deref()
    }
}

/// Boxed stream of message deltas from a streaming generation.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ChatMessageStreamDelta>> + Send>>;

/// How strongly the backend is steered towards tool use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Leave the decision to the model.
    #[default]
    Auto,
    /// Force at least one tool call.
    Required,
    /// Forbid tool calls for this request.
    None,
}

impl ToolChoice {
    /// The wire value the chat-completions API expects.
    #[must_use]
    pub const fn as_openai_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Required => "required",
            Self::None => "none",
        }
    }
}

/// Per-call generation knobs the driver hands to a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sequences that cut generation short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Tools advertised on the structured channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Steering for tool use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Structured response format (e.g. JSON mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

impl GenerateOptions {
    /// Options with every knob at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cut generation at any of these sequences.
    #[must_use]
    pub fn with_stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(sequences);
        self
    }

    /// Advertise tools on the structured channel.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Steer tool use.
    #[must_use]
    pub const fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Pick a sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Cap completion tokens.
    #[must_use]
    pub const fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Request a structured response format.
    #[must_use]
    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Whether any stop sequence is set.
    #[must_use]
    pub fn has_stop_sequences(&self) -> bool {
        self.stop_sequences.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// The one interface the agent loop drives a backend through.
#[async_trait]
pub trait Model: Send + Sync {
    /// The bound model identifier (e.g. "gpt-4o").
    fn model_id(&self) -> &str;

    /// One blocking generation over the message list.
    ///
    /// # Errors
    ///
    /// Generation errors from the backend, including unparseable
    /// responses.
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelResponse>;

    /// Streaming generation; backends without native streaming inherit
    /// this adapter, which yields the blocking result as a single delta.
    ///
    /// # Errors
    ///
    /// Generation errors from the backend.
    async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelStream> {
        let response = self.generate(messages, options).await?;
        let delta = ChatMessageStreamDelta {
            content: response.message.text_content(),
            tool_calls: None,
            token_usage: response.token_usage,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(delta) })))
    }

    /// Whether the backend honors server-side stop sequences; the
    /// driver truncates client-side when it does not.
    fn supports_stop_parameter(&self) -> bool {
        model_supports_stop_parameter(self.model_id())
    }

    /// Whether `generate_stream` is native rather than the adapter.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether the backend has a structured tool-call channel.
    fn supports_tool_calling(&self) -> bool {
        true
    }

    /// Short backend name for logs (e.g. "openai").
    fn provider(&self) -> &'static str {
        "unknown"
    }
}

/// Model-id prefixes of families that reject the server-side `stop`
/// parameter. Generation for these gets client-side truncation instead.
const STOP_UNSUPPORTED_PREFIXES: &[&str] = &["o3", "o4", "gpt-5"];

/// Family members that accept `stop` despite a matching prefix.
const STOP_SUPPORTED_OVERRIDES: &[&str] = &["o3-mini"];

/// Families that deprecated `max_tokens` in favor of
/// `max_completion_tokens`.
const MAX_COMPLETION_TOKENS_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

/// Strip a router-style `provider/` prefix from a model id.
fn bare_model_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// Whether this model id accepts the server-side stop parameter.
#[must_use]
pub fn model_supports_stop_parameter(model_id: &str) -> bool {
    let name = bare_model_name(model_id);
    if STOP_SUPPORTED_OVERRIDES.contains(&name) {
        return true;
    }
    !STOP_UNSUPPORTED_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Whether this model id wants `max_completion_tokens` rather than the
/// deprecated `max_tokens` field.
#[must_use]
pub fn model_requires_max_completion_tokens(model_id: &str) -> bool {
    let name = bare_model_name(model_id);
    MAX_COMPLETION_TOKENS_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Truncate content at the first occurrence of any stop sequence.
///
/// Used for client-side stop handling when the model family does not
/// support the stop parameter server-side.
#[must_use]
pub fn truncate_at_stop(content: &str, stop_sequences: &[String]) -> String {
    let mut cut = content.len();
    for stop in stop_sequences {
        if let Some(pos) = content.find(stop.as_str()) {
            cut = cut.min(pos);
        }
    }
    content[..cut].to_owned()
}

/// Backoff policy for rate-limited requests.
///
/// The delay before retry number `attempt` (0-indexed) is
/// `wait_seconds * exponential_base^attempt * (1 + jitter)`, with `jitter`
/// drawn uniformly from `[0, 1)` so simultaneous clients fan out instead of
/// retrying in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Attempts before giving up, including the first call.
    pub max_attempts: u32,
    /// Base wait in seconds.
    pub wait_seconds: f64,
    /// Growth factor per attempt.
    pub exponential_base: f64,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_seconds: 1.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// The delay to sleep before retry `attempt` (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        // Cap the exponent so a misconfigured attempt count cannot
        // overflow into an effectively infinite sleep.
        let exponent = attempt.min(16) as i32;
        let mut seconds = self.wait_seconds * self.exponential_base.powi(exponent);
        if self.jitter {
            seconds *= 1.0 + jitter_unit();
        }
        std::time::Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// A cheap uniform draw from `[0, 1)`, seeded from the hasher
/// randomness the standard library already carries.
fn jitter_unit() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    const BUCKETS: u64 = 1 << 20;
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0x5bd1_e995);
    (hasher.finish() % BUCKETS) as f64 / BUCKETS as f64
}

/// Run an operation with exponential backoff on rate-limit failures.
///
/// Errors that do not look like rate limits bypass retry entirely.
///
/// # Errors
///
/// The last error after retry exhaustion, or the first non-retryable one.
pub async fn with_rate_limit_retries<T, F, Fut>(config: RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && attempt + 1 < config.max_attempts => {
                let delay = config.backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Pull a whole delta stream and agglomerate it into one response.
///
/// # Errors
///
/// The first stream error encountered.
pub async fn collect_stream(mut stream: ModelStream) -> Result<ModelResponse> {
    use futures::StreamExt as _;

    let mut deltas = Vec::new();
    while let Some(delta) = stream.next().await {
        deltas.push(delta?);
    }
    let message = crate::message::aggregate_stream_deltas(&deltas);
    let usage = message.token_usage;
    let mut response = ModelResponse::new(message);
    if let Some(usage) = usage {
        response = response.with_token_usage(usage);
    }
    Ok(response)
}
