//! Error types for tools.

use thiserror::Error;

use crate::error::AgentError;

/// Errors raised by tool validation, setup, or execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Arguments failed schema validation.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool raised during execution.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The tool's one-time setup hook failed.
    #[error("setup failed: {0}")]
    Setup(String),

    /// No tool with the requested name is registered.
    #[error("unknown tool: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArguments(_) | ToolError::NotFound(_) => {
                Self::ToolCall(err.to_string())
            }
            ToolError::Execution(_) | ToolError::Setup(_) => Self::ToolExecution(err.to_string()),
        }
    }
}
