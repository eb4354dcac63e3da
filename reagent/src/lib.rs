//! # reagent
//!
//! A multi-step LLM agent runtime: given a natural-language task, a model,
//! and a set of typed tools, it drives a reason-act-observe loop until the
//! model produces a final answer or the step budget runs out.
//!
//! Two agent strategies are supported:
//!
//! - **Tool-calling** ([`Agent::tool_calling`]): actions come from the
//!   model's structured tool-call channel and fan out over the toolbox.
//! - **Code** ([`Agent::code`]): the model emits one code block per step,
//!   executed in a restricted in-process interpreter whose locals expose
//!   the tools as ordinary callables plus a `final_answer` function.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reagent::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> reagent::Result<()> {
//!     let model = OpenAIClient::from_env().completion_model("gpt-4o");
//!
//!     let mut agent = Agent::code()
//!         .model(Box::new(model))
//!         .tool(Arc::new(WebSearchTool::duckduckgo()))
//!         .tool(Arc::new(VisitWebpageTool::new()))
//!         .max_steps(10)
//!         .build()?;
//!
//!     let answer = agent.run("Who wrote the Rust book?").await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod callback;
pub mod error;
pub mod interpreter;
pub mod managed;
pub mod memory;
pub mod message;
pub mod models;
pub mod monitor;
pub mod multimodal;
pub mod prompts;
pub mod tool;
pub mod tools;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, CodeTags, FinalAnswerChecks, RunOptions, RunResult,
    RunState, StreamEvent, StreamItem,
};
pub use error::{AgentError, ErrorKind, Result, StepError};
pub use memory::{
    ActionStep, AgentMemory, FinalAnswerStep, MemoryStep, PlanningStep, StepVariant,
    SystemPromptStep, TaskStep, ToolCall,
};
pub use message::{
    aggregate_stream_deltas, ChatMessage, ChatMessageStreamDelta, ChatMessageToolCall,
    ContentPart, MessageContent, MessageRole,
};
pub use monitor::{Monitor, RunMetrics, Timing, TokenUsage};
pub use multimodal::{AgentAudio, AgentImage, AgentText, AgentValue};

/// Convenient glob import for applications.
pub mod prelude {
    pub use crate::agent::{Agent, AgentBuilder, CodeTags, RunOptions, RunResult, RunState};
    pub use crate::error::{AgentError, Result};
    pub use crate::managed::ManagedAgent;
    pub use crate::models::{
        CompletionModel, GenerateOptions, Model, ModelResponse, OpenAIClient, Throttled,
    };
    pub use crate::multimodal::{AgentImage, AgentValue};
    pub use crate::tool::{ParamType, Tool, ToolBox, ToolInputs, ToolParam};
    pub use crate::tools::{
        CodeInterpreterTool, FinalAnswerTool, UserInputTool, VisitWebpageTool, WebSearchTool,
    };
}
