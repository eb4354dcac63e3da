//! Run results and step-level stream events.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::memory::ActionStep;
use crate::monitor::{Timing, TokenUsage};

/// Outcome of one action step.
#[derive(Debug, Clone)]
pub(crate) enum StepResult {
    /// Continue with the next step.
    Continue,
    /// The step produced the final answer.
    FinalAnswer(Value),
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// A final answer was produced.
    Success,
    /// The step budget ran out; the output was synthesized.
    MaxStepsReached,
    /// The run was interrupted cooperatively.
    Interrupted,
    /// A fatal error ended the run.
    Failed,
}

/// Aggregate record of a single run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The run's output value, when one was produced.
    pub output: Option<Value>,
    /// Terminal state.
    pub state: RunState,
    /// Number of action steps taken.
    pub steps_taken: usize,
    /// Total token usage across action and planning steps, when every such
    /// step recorded usage.
    pub token_usage: Option<TokenUsage>,
    /// Total wall time.
    pub timing: Timing,
    /// Rendered error for non-success states.
    pub error: Option<String>,
}

impl RunResult {
    /// Collapse into a plain value result.
    ///
    /// # Errors
    ///
    /// Maps non-success states back to their [`AgentError`] kinds.
    pub fn into_result(self, max_steps: usize) -> Result<Value> {
        match self.state {
            RunState::Success | RunState::MaxStepsReached if self.output.is_some() => {
                Ok(self.output.unwrap_or(Value::Null))
            }
            RunState::MaxStepsReached => Err(AgentError::max_steps(max_steps)),
            RunState::Interrupted => Err(AgentError::Interrupted),
            _ => Err(AgentError::generation(
                self.error.unwrap_or_else(|| "agent run failed".to_owned()),
            )),
        }
    }
}

/// Step-level event emitted by [`Agent::stream`](super::Agent::stream).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental model output text.
    TextDelta(String),
    /// Token usage reported by the model.
    TokenUsage(TokenUsage),
    /// A tool call was parsed and is about to run.
    ToolCallStart {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A tool call finished.
    ToolCallComplete {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Rendered result or error text.
        result: std::result::Result<String, String>,
    },
    /// A planning step completed with this plan.
    Plan(String),
    /// An action step was appended to memory.
    StepComplete {
        /// The step number.
        step: usize,
        /// The completed step.
        action_step: Box<ActionStep>,
    },
    /// The run produced its final answer.
    FinalAnswer {
        /// The answer value.
        answer: Value,
    },
    /// A recoverable error was recorded; the run continues.
    Error(String),
}

/// Item yielded by the event stream.
pub type StreamItem = Result<StreamEvent>;
