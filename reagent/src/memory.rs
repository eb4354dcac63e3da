//! Episodic memory: the ordered sequence of typed steps that becomes the
//! model's next prompt.
//!
//! Steps are a sum type so the step-to-messages projection is total. The
//! memory owns its steps; the agent appends exactly one step per loop
//! iteration (plus the optional planning step) and replays the whole
//! sequence through [`AgentMemory::to_messages`] before every model call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::StepError;
use crate::message::{ChatMessage, ContentPart, MessageRole};
use crate::monitor::{Timing, TokenUsage};
use crate::multimodal::AgentImage;

/// A tool call made during execution, as recorded in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the tool call.
    pub id: String,
    /// Name of the tool.
    pub name: String,
    /// Arguments passed to the tool.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The system prompt, always at position zero of the projection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemPromptStep {
    /// Rendered system prompt text.
    pub system_prompt: String,
}

/// The user's task, optionally with attached images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Task prose (with any additional-args context appended).
    pub task: String,
    /// Images attached to the task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<AgentImage>,
}

impl TaskStep {
    /// Create a task step without images.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            images: Vec::new(),
        }
    }

    /// Create a task step with attached images.
    pub fn with_images(task: impl Into<String>, images: Vec<AgentImage>) -> Self {
        Self {
            task: task.into(),
            images,
        }
    }
}

/// A reflective planning step inserted every `planning_interval` actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningStep {
    /// Messages sent to the model to produce the plan.
    pub model_input_messages: Vec<ChatMessage>,
    /// The plan text.
    pub plan: String,
    /// The raw model output message.
    pub model_output_message: ChatMessage,
    /// Wall-clock timing.
    pub timing: Timing,
    /// Token usage for the planning call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// One reason-act-observe iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// 1-based step number, strictly increasing within a run.
    pub step_number: usize,
    /// Wall-clock timing.
    pub timing: Timing,
    /// Messages sent to the model for this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_input_messages: Option<Vec<ChatMessage>>,
    /// Tool calls parsed from the model output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Error recorded on this step, if any; surfaced as a retry prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Raw text the model produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_output: Option<String>,
    /// The full model output message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_output_message: Option<ChatMessage>,
    /// The code block executed by a code agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_action: Option<String>,
    /// Concatenated tool observations / execution logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    /// Images produced as observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observation_images: Vec<AgentImage>,
    /// The step's output value (the final answer when `is_final_answer`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_output: Option<Value>,
    /// Token usage for this step's model call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Whether this step produced the final answer.
    #[serde(default)]
    pub is_final_answer: bool,
}

impl Default for ActionStep {
    fn default() -> Self {
        Self {
            step_number: 0,
            timing: Timing::begin(),
            model_input_messages: None,
            tool_calls: None,
            error: None,
            model_output: None,
            model_output_message: None,
            code_action: None,
            observations: None,
            observation_images: Vec::new(),
            action_output: None,
            token_usage: None,
            is_final_answer: false,
        }
    }
}

/// The terminal step recording the run's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswerStep {
    /// The final answer value.
    pub output: Value,
}

/// Tag identifying a step variant, used by the callback registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepVariant {
    /// [`SystemPromptStep`].
    SystemPrompt,
    /// [`TaskStep`].
    Task,
    /// [`PlanningStep`].
    Planning,
    /// [`ActionStep`].
    Action,
    /// [`FinalAnswerStep`].
    FinalAnswer,
}

/// A memory step: the sum of all step variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum MemoryStep {
    /// The system prompt.
    SystemPrompt(SystemPromptStep),
    /// A user task.
    Task(TaskStep),
    /// A planning step.
    Planning(PlanningStep),
    /// An action step.
    Action(ActionStep),
    /// The terminal final-answer record.
    FinalAnswer(FinalAnswerStep),
}

impl MemoryStep {
    /// The variant tag of this step.
    #[must_use]
    pub const fn variant(&self) -> StepVariant {
        match self {
            Self::SystemPrompt(_) => StepVariant::SystemPrompt,
            Self::Task(_) => StepVariant::Task,
            Self::Planning(_) => StepVariant::Planning,
            Self::Action(_) => StepVariant::Action,
            Self::FinalAnswer(_) => StepVariant::FinalAnswer,
        }
    }

    /// Token usage recorded on this step, when the variant carries any.
    #[must_use]
    pub const fn token_usage(&self) -> Option<TokenUsage> {
        match self {
            Self::Planning(step) => step.token_usage,
            Self::Action(step) => step.token_usage,
            _ => None,
        }
    }

    /// Project this step into chat messages.
    ///
    /// In summary mode the system prompt, plan, and raw model output are
    /// dropped so a sub-agent report shows only tasks and observations.
    #[must_use]
    pub fn to_messages(&self, summary_mode: bool) -> Vec<ChatMessage> {
        match self {
            Self::SystemPrompt(step) => {
                if summary_mode {
                    Vec::new()
                } else {
                    vec![ChatMessage::system(step.system_prompt.clone())]
                }
            }
            Self::Task(step) => {
                let text = format!("New task:\n{}", step.task);
                vec![message_with_images(MessageRole::User, text, &step.images)]
            }
            Self::Planning(step) => {
                if summary_mode {
                    Vec::new()
                } else {
                    vec![
                        ChatMessage::assistant(step.plan.clone()),
                        ChatMessage::user("Now proceed and carry out this plan."),
                    ]
                }
            }
            Self::Action(step) => action_step_messages(step, summary_mode),
            Self::FinalAnswer(_) => Vec::new(),
        }
    }
}

fn message_with_images(role: MessageRole, text: String, images: &[AgentImage]) -> ChatMessage {
    if images.is_empty() {
        ChatMessage::new(role, text)
    } else {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(images.iter().map(|image| ContentPart::Image {
            image: image.to_base64(),
        }));
        ChatMessage::with_parts(role, parts)
    }
}

fn action_step_messages(step: &ActionStep, summary_mode: bool) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if !summary_mode {
        if let Some(output) = &step.model_output {
            messages.push(ChatMessage::assistant(output.clone()));
        }
    }

    if let Some(tool_calls) = &step.tool_calls {
        let rendered = serde_json::to_string(tool_calls).unwrap_or_default();
        messages.push(ChatMessage::tool_call(format!("Calling tools:\n{rendered}")));
    }

    if !step.observation_images.is_empty() {
        messages.push(message_with_images(
            MessageRole::User,
            "Here are the observed images:".to_owned(),
            &step.observation_images,
        ));
    }

    if let Some(observations) = &step.observations {
        messages.push(ChatMessage::tool_response(format!(
            "Observation:\n{observations}"
        )));
    }

    if let Some(error) = &step.error {
        let call_id = step
            .tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
            .map(|call| call.id.as_str())
            .unwrap_or("none");
        messages.push(ChatMessage::tool_response(format!(
            "Call id: {call_id}\nError:\n{error}\nNow let's retry: take care not to repeat \
             previous errors! If you have retried several times, try a completely different \
             approach.\n"
        )));
    }

    messages
}

/// Ordered sequence of typed steps plus the system prompt.
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    /// The system prompt step.
    pub system_prompt: SystemPromptStep,
    /// All steps appended during the run, in temporal order.
    pub steps: Vec<MemoryStep>,
}

impl AgentMemory {
    /// Create a memory seeded with a system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: SystemPromptStep {
                system_prompt: system_prompt.into(),
            },
            steps: Vec::new(),
        }
    }

    /// Append a step. Steps are exclusively owned by the memory.
    pub fn add_step(&mut self, step: impl Into<MemoryStep>) {
        self.steps.push(step.into());
    }

    /// Drop all steps, keeping the system prompt.
    pub fn reset(&mut self) {
        self.steps.clear();
    }

    /// Project the whole memory into chat messages.
    ///
    /// The projection begins with the system prompt (unless in summary mode)
    /// and appends each step's projection in order.
    #[must_use]
    pub fn to_messages(&self, summary_mode: bool) -> Vec<ChatMessage> {
        let mut messages =
            MemoryStep::SystemPrompt(self.system_prompt.clone()).to_messages(summary_mode);
        for step in &self.steps {
            messages.extend(step.to_messages(summary_mode));
        }
        messages
    }

    /// Serialize every step, including model input messages.
    #[must_use]
    pub fn full_steps(&self) -> Vec<Value> {
        self.steps
            .iter()
            .map(|step| serde_json::to_value(step).unwrap_or(Value::Null))
            .collect()
    }

    /// Serialize every step, dropping the bulky model input messages.
    #[must_use]
    pub fn succinct_steps(&self) -> Vec<Value> {
        self.steps
            .iter()
            .map(|step| {
                let mut value = serde_json::to_value(step).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut value {
                    map.remove("model_input_messages");
                }
                value
            })
            .collect()
    }

    /// Replay the run through the logger, step by step.
    ///
    /// With `detailed`, model input messages are logged too; this can get
    /// long for big runs.
    pub fn replay(&self, detailed: bool) {
        info!("Replaying agent memory ({} steps)", self.steps.len());
        for step in &self.steps {
            match step {
                MemoryStep::SystemPrompt(s) => {
                    info!(system_prompt = %s.system_prompt, "replay: system prompt");
                }
                MemoryStep::Task(s) => info!(task = %s.task, "replay: task"),
                MemoryStep::Planning(s) => {
                    if detailed {
                        info!(inputs = s.model_input_messages.len(), "replay: plan inputs");
                    }
                    info!(plan = %s.plan, "replay: planning step");
                }
                MemoryStep::Action(s) => {
                    if detailed {
                        if let Some(inputs) = &s.model_input_messages {
                            info!(step = s.step_number, inputs = inputs.len(), "replay: inputs");
                        }
                    }
                    info!(
                        step = s.step_number,
                        output = s.model_output.as_deref().unwrap_or(""),
                        observations = s.observations.as_deref().unwrap_or(""),
                        error = s.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "replay: action step"
                    );
                }
                MemoryStep::FinalAnswer(s) => info!(output = %s.output, "replay: final answer"),
            }
        }
    }

    /// Total token usage across action and planning steps.
    ///
    /// Returns `None` when any such step is missing usage, so aggregate
    /// numbers are never silently underreported.
    #[must_use]
    pub fn total_token_usage(&self) -> Option<TokenUsage> {
        let mut total = TokenUsage::default();
        for step in &self.steps {
            match step {
                MemoryStep::Action(_) | MemoryStep::Planning(_) => {
                    total += step.token_usage()?;
                }
                _ => {}
            }
        }
        Some(total)
    }

    /// Step numbers of all action steps, in memory order.
    #[must_use]
    pub fn action_step_numbers(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                MemoryStep::Action(s) => Some(s.step_number),
                _ => None,
            })
            .collect()
    }
}

impl From<TaskStep> for MemoryStep {
    fn from(step: TaskStep) -> Self {
        Self::Task(step)
    }
}

impl From<PlanningStep> for MemoryStep {
    fn from(step: PlanningStep) -> Self {
        Self::Planning(step)
    }
}

impl From<ActionStep> for MemoryStep {
    fn from(step: ActionStep) -> Self {
        Self::Action(step)
    }
}

impl From<FinalAnswerStep> for MemoryStep {
    fn from(step: FinalAnswerStep) -> Self {
        Self::FinalAnswer(step)
    }
}
