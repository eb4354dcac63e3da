//! Unified error taxonomy for the agent runtime.
//!
//! [`AgentError`] covers every failure mode the step loop can encounter.
//! The driver recovers from parsing, tool-call, tool-execution, and sandbox
//! errors by recording them on the current action step and re-prompting the
//! model; generation failures and interrupts are fatal; the max-steps case
//! is terminal and routed through the final-answer synthesizer.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for agent runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// Model output could not be parsed into tool calls or a code block.
    #[error("Error in parsing model output: {0}")]
    Parsing(String),

    /// Tool arguments failed validation or the tool name is unknown.
    #[error("Error in tool call execution: {0}")]
    ToolCall(String),

    /// A tool raised during execution.
    #[error("Error executing tool: {0}")]
    ToolExecution(String),

    /// The code-agent sandbox raised during evaluation.
    #[error("Error in code execution: {0}")]
    Execution(String),

    /// The model call itself failed unrecoverably.
    #[error("Error in generating model output: {0}")]
    Generation(String),

    /// Maximum steps reached without a final answer.
    #[error("Reached max steps ({max_steps})")]
    MaxSteps {
        /// The configured step budget.
        max_steps: usize,
    },

    /// Agent execution was interrupted.
    #[error("Agent interrupted")]
    Interrupted,
}

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate limit|too many requests|429").expect("valid rate-limit regex")
});

impl AgentError {
    /// Create a parsing error with a message.
    #[must_use]
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create a tool-call error with a message.
    #[must_use]
    pub fn tool_call(msg: impl Into<String>) -> Self {
        Self::ToolCall(msg.into())
    }

    /// Create a tool-execution error with a message.
    #[must_use]
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a code-execution error with a message.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a generation error with a message.
    #[must_use]
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Create a max-steps error.
    #[must_use]
    pub const fn max_steps(max_steps: usize) -> Self {
        Self::MaxSteps { max_steps }
    }

    /// Whether the driver recovers from this error by recording it on the
    /// current step and continuing the loop.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parsing(_) | Self::ToolCall(_) | Self::ToolExecution(_) | Self::Execution(_)
        )
    }

    /// Whether this looks like a provider rate limit (HTTP 429 or a matching
    /// body), which qualifies for retry with exponential backoff.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Generation(msg) => RATE_LIMIT_RE.is_match(msg),
            _ => false,
        }
    }
}

/// Discriminant of an [`AgentError`], serializable for step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model output could not be parsed.
    Parsing,
    /// Tool arguments failed validation or the tool is unknown.
    ToolCall,
    /// A tool raised during execution.
    ToolExecution,
    /// The code sandbox raised.
    Execution,
    /// The model call failed.
    Generation,
    /// Step budget exhausted.
    MaxSteps,
    /// Cooperative interrupt.
    Interrupted,
}

impl AgentError {
    /// The serializable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Parsing(_) => ErrorKind::Parsing,
            Self::ToolCall(_) => ErrorKind::ToolCall,
            Self::ToolExecution(_) => ErrorKind::ToolExecution,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Generation(_) => ErrorKind::Generation,
            Self::MaxSteps { .. } => ErrorKind::MaxSteps,
            Self::Interrupted => ErrorKind::Interrupted,
        }
    }
}

/// An error as recorded on a memory step: kind plus rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// The error kind.
    pub kind: ErrorKind,
    /// Human-readable message, embedded in the retry prompt.
    pub message: String,
}

impl From<&AgentError> for StepError {
    fn from(err: &AgentError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Generation(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(AgentError::parsing("x").is_recoverable());
        assert!(AgentError::tool_call("x").is_recoverable());
        assert!(AgentError::tool_execution("x").is_recoverable());
        assert!(AgentError::execution("x").is_recoverable());
        assert!(!AgentError::generation("x").is_recoverable());
        assert!(!AgentError::max_steps(5).is_recoverable());
        assert!(!AgentError::Interrupted.is_recoverable());
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(AgentError::generation("HTTP 429: slow down").is_rate_limited());
        assert!(AgentError::generation("Rate limit exceeded").is_rate_limited());
        assert!(AgentError::generation("too many requests").is_rate_limited());
        assert!(!AgentError::generation("connection refused").is_rate_limited());
        assert!(!AgentError::parsing("rate limit").is_rate_limited());
    }

    #[test]
    fn test_interrupted_message() {
        assert_eq!(AgentError::Interrupted.to_string(), "Agent interrupted");
    }
}
