//! Model backends and the abstract model interface.
//!
//! The agent depends only on [`Model`]; concrete backends live in
//! submodules. [`Throttled`] and the retry helpers compose rate limiting
//! and backoff around any backend.

pub mod common;
pub mod openai;
pub mod rate_limit;
pub mod streaming;

pub use common::{
    collect_stream, model_requires_max_completion_tokens, model_supports_stop_parameter,
    truncate_at_stop, with_rate_limit_retries, GenerateOptions, Model, ModelResponse, ModelStream,
    RetryConfig, ToolChoice,
};
pub use openai::{CompletionModel, OpenAIClient};
pub use rate_limit::{RateLimiter, Throttled};
pub use streaming::{sse_payloads, SseDecoder};
