//! The multi-step agent driver and its two strategies.
//!
//! [`Agent`] owns the shared reason-act-observe loop: planning cadence,
//! action steps, final-answer checks, callbacks, interrupt handling, and the
//! max-steps synthesis path. The per-step action is delegated to a strategy:
//! reading the model's structured tool-call channel, or executing a code
//! block in the local sandbox.

mod builder;
mod checks;
mod code;
mod config;
mod events;
mod tool_calling;

pub use builder::AgentBuilder;
pub use checks::{FinalAnswerCheck, FinalAnswerChecks};
pub use code::CodeTags;
pub use config::{AgentConfig, RunOptions};
pub use events::{RunResult, RunState, StreamEvent, StreamItem};

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::callback::{CallbackContext, CallbackRegistry};
use crate::error::{AgentError, Result, StepError};
use crate::interpreter::{InterpreterError, LocalExecutor};
use crate::managed::{ManagedAgent, ManagedAgentRegistry};
use crate::memory::{
    ActionStep, AgentMemory, FinalAnswerStep, MemoryStep, PlanningStep, TaskStep,
};
use crate::message::{aggregate_stream_deltas, ChatMessage, MessageContent};
use crate::models::{truncate_at_stop, GenerateOptions, Model};
use crate::monitor::{Monitor, RunMetrics, Timing};
use crate::prompts::{render, PromptTemplates};
use crate::tool::ToolBox;

use events::StepResult;

/// The per-step action strategy.
pub(crate) enum AgentExecutor {
    /// Read tool calls from the model's structured channel.
    ToolCalling,
    /// Parse a code block and run it in the local sandbox.
    Code {
        executor: LocalExecutor,
        tags: CodeTags,
        structured_output: bool,
    },
}

/// A multi-step agent driving a reason-act-observe loop.
///
/// Build one with [`Agent::tool_calling`] or [`Agent::code`]:
///
/// ```rust,ignore
/// let mut agent = Agent::code()
///     .model(Box::new(model))
///     .tool(Arc::new(WebSearchTool::duckduckgo()))
///     .build()?;
///
/// let answer = agent.run("How many seconds are in a leap year?").await?;
/// ```
pub struct Agent {
    pub(crate) model: Box<dyn Model>,
    pub(crate) tools: ToolBox,
    pub(crate) managed_agents: ManagedAgentRegistry,
    pub(crate) config: AgentConfig,
    pub(crate) memory: AgentMemory,
    pub(crate) prompt_templates: PromptTemplates,
    pub(crate) executor: AgentExecutor,
    pub(crate) interrupt_flag: Arc<AtomicBool>,
    pub(crate) step_number: usize,
    pub(crate) state: HashMap<String, Value>,
    pub(crate) final_answer_checks: FinalAnswerChecks,
    pub(crate) monitor: Monitor,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) current_task: String,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("tools", &self.tools.names())
            .field("managed_agents", &self.managed_agents.names())
            .field("step", &self.step_number)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Builder for a tool-calling agent.
    #[must_use]
    pub fn tool_calling() -> AgentBuilder {
        AgentBuilder::tool_calling()
    }

    /// Builder for a code agent.
    #[must_use]
    pub fn code() -> AgentBuilder {
        AgentBuilder::code()
    }

    /// Run the agent on a task, returning the final answer.
    #[inline]
    pub async fn run(&mut self, task: &str) -> Result<Value> {
        self.run_with(task, RunOptions::default()).await
    }

    /// Run with per-run options, returning the final answer.
    pub async fn run_with(&mut self, task: &str, options: RunOptions) -> Result<Value> {
        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        self.run_detailed_with(task, options)
            .await
            .into_result(max_steps)
    }

    /// Run the agent, returning the detailed [`RunResult`].
    #[inline]
    pub async fn run_detailed(&mut self, task: &str) -> RunResult {
        self.run_detailed_with(task, RunOptions::default()).await
    }

    /// Run with per-run options, returning the detailed [`RunResult`].
    #[instrument(skip(self, options), fields(max_steps = self.config.max_steps))]
    pub async fn run_detailed_with(&mut self, task: &str, options: RunOptions) -> RunResult {
        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        self.prepare_run(task, &options);
        info!("Starting agent run");

        let timing = Timing::begin();
        let mut events = Vec::new();
        let result = self.execute_loop(max_steps, &mut events).await;
        let mut final_timing = timing;
        final_timing.finish();

        self.complete_run(result, final_timing)
    }

    /// Stream step-level events while running.
    ///
    /// Events include model text deltas, tool call lifecycles, completed
    /// steps, and the final answer.
    #[instrument(skip(self, options), fields(max_steps = self.config.max_steps))]
    pub fn stream_with(
        &mut self,
        task: &str,
        options: RunOptions,
    ) -> impl Stream<Item = StreamItem> + '_ {
        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        self.prepare_run(task, &options);
        info!("Starting streaming agent run");

        stream! {
            let mut finished = false;

            while self.step_number < max_steps && !finished {
                if self.interrupt_flag.load(Ordering::SeqCst) {
                    yield Err(AgentError::Interrupted);
                    return;
                }

                let mut events = Vec::new();
                if let Err(e) = self.maybe_plan(max_steps, &mut events).await {
                    for event in events.drain(..) {
                        yield Ok(event);
                    }
                    yield Err(e);
                    return;
                }
                for event in events.drain(..) {
                    yield Ok(event);
                }

                let (mut step, result) = self.advance_one_step(&mut events).await;
                match result {
                    Ok(StepResult::FinalAnswer(answer)) => {
                        if let Err(e) = self.guard_single_final_answer() {
                            step.is_final_answer = false;
                            step.error = Some(StepError::from(&e));
                            self.finalize_step(step, max_steps, &mut events);
                            for event in events.drain(..) {
                                yield Ok(event);
                            }
                            yield Err(e);
                            return;
                        }
                        match self.final_answer_checks.validate(&answer, &self.memory) {
                            Ok(()) => {
                                self.finalize_step(step, max_steps, &mut events);
                                self.record_final_answer(&answer, max_steps);
                                events.push(StreamEvent::FinalAnswer { answer });
                                finished = true;
                            }
                            Err(e) => {
                                step.is_final_answer = false;
                                step.error = Some(StepError::from(&e));
                                self.monitor.record_error(&e.to_string());
                                self.finalize_step(step, max_steps, &mut events);
                                events.push(StreamEvent::Error(e.to_string()));
                            }
                        }
                    }
                    Ok(StepResult::Continue) => {
                        self.finalize_step(step, max_steps, &mut events);
                    }
                    Err(e) if e.is_recoverable() => {
                        step.error = Some(StepError::from(&e));
                        self.monitor.record_error(&e.to_string());
                        self.finalize_step(step, max_steps, &mut events);
                        events.push(StreamEvent::Error(e.to_string()));
                    }
                    Err(e) => {
                        step.error = Some(StepError::from(&e));
                        self.finalize_step(step, max_steps, &mut events);
                        for event in events.drain(..) {
                            yield Ok(event);
                        }
                        yield Err(e);
                        return;
                    }
                }

                for event in events.drain(..) {
                    yield Ok(event);
                }
            }

            if !finished {
                match self.synthesize_final_answer(max_steps).await {
                    Ok(answer) => {
                        yield Ok(StreamEvent::FinalAnswer { answer });
                        yield Err(AgentError::max_steps(max_steps));
                    }
                    Err(e) => yield Err(e),
                }
            }
        }
    }

    /// Stream step-level events with default run options.
    pub fn stream(&mut self, task: &str) -> impl Stream<Item = StreamItem> + '_ {
        self.stream_with(task, RunOptions::default())
    }

    /// Request the agent to stop before its next step.
    #[inline]
    pub fn interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt has been requested.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::SeqCst)
    }

    /// A handle that can interrupt this agent from another task.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or("agent")
    }

    /// The agent's memory.
    #[must_use]
    pub const fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Mutable access to the agent's memory.
    pub fn memory_mut(&mut self) -> &mut AgentMemory {
        &mut self.memory
    }

    /// The agent's mutable state mapping.
    pub fn state_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.state
    }

    /// Register a step callback.
    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Metrics for the current or last run.
    #[must_use]
    pub fn metrics(&mut self) -> RunMetrics {
        self.monitor.complete()
    }

    /// Reset run state: memory, step counter, agent state, interrupt flag.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.step_number = 0;
        self.state.clear();
        self.interrupt_flag.store(false, Ordering::SeqCst);
        self.monitor.reset();
        if let AgentExecutor::Code { executor, .. } = &mut self.executor {
            executor.reset();
        }
    }

    /// Run as a managed sub-agent: wraps the task in the managed-agent
    /// template and frames the answer as a report.
    pub async fn call_as_managed(&mut self, task: &str) -> Result<String> {
        let name = self.name().to_owned();
        let full_task = render(
            &self.prompt_templates.managed_agent.task,
            &[("name", name.as_str()), ("task", task)],
        );
        let result = self.run(&full_task).await?;

        let report = match result {
            Value::Null => "No result produced".to_owned(),
            Value::String(s) => s,
            other => other.to_string(),
        };
        let mut answer = render(
            &self.prompt_templates.managed_agent.report,
            &[("name", name.as_str()), ("final_answer", report.as_str())],
        );

        if self.config.provide_run_summary {
            answer.push_str(
                "\n\nFor more detail, find below a summary of this agent's work:\n\
                 <summary_of_work>\n",
            );
            for msg in self.memory.to_messages(true) {
                if let Some(content) = msg.text_content() {
                    if content.len() > 1000 {
                        let cut = content
                            .char_indices()
                            .take_while(|(i, _)| *i < 1000)
                            .last()
                            .map_or(0, |(i, c)| i + c.len_utf8());
                        let _ = write!(answer, "\n{}...\n---", &content[..cut]);
                    } else {
                        let _ = write!(answer, "\n{content}\n---");
                    }
                }
            }
            answer.push_str("\n</summary_of_work>");
        }

        Ok(answer)
    }

    /// Convert into a [`ManagedAgent`] usable by a parent agent.
    ///
    /// The agent must have a name and description configured.
    #[must_use]
    pub fn into_managed(self) -> Box<dyn ManagedAgent> {
        Box::new(ManagedRunner {
            name: self.config.name.clone().unwrap_or_else(|| "agent".to_owned()),
            description: self
                .config
                .description
                .clone()
                .unwrap_or_else(|| "A helpful agent".to_owned()),
            inner: tokio::sync::Mutex::new(self),
        })
    }
}

// Run preparation and completion.
impl Agent {
    fn prepare_run(&mut self, task: &str, options: &RunOptions) {
        if !options.keep_memory {
            self.memory.reset();
            self.step_number = 0;
            self.state.clear();
            self.monitor.reset();
            if let AgentExecutor::Code { executor, .. } = &mut self.executor {
                executor.reset();
            }
        }
        self.interrupt_flag.store(false, Ordering::SeqCst);

        for (key, value) in &options.additional_args {
            self.state.insert(key.clone(), value.clone());
        }

        let system_prompt = self.render_system_prompt();
        self.memory.system_prompt.system_prompt = system_prompt;

        self.current_task = self.format_task(task, options);
        let task_step = if options.images.is_empty() {
            TaskStep::new(self.current_task.clone())
        } else {
            TaskStep::with_images(self.current_task.clone(), options.images.clone())
        };

        let ctx = self.callback_context(self.config.max_steps);
        let step = MemoryStep::Task(task_step);
        self.callbacks.dispatch(&step, &ctx);
        self.memory.steps.push(step);
    }

    fn format_task(&self, task: &str, options: &RunOptions) -> String {
        if options.additional_args.is_empty() {
            task.to_owned()
        } else {
            let context = serde_json::to_string_pretty(&options.additional_args)
                .unwrap_or_default();
            format!(
                "{task}\n\nYou have been provided with these additional arguments, that you can \
                 access directly using the keys as variables:\n{context}"
            )
        }
    }

    fn complete_run(&mut self, result: Result<(Value, RunState)>, timing: Timing) -> RunResult {
        let token_usage = self.memory.total_token_usage();
        let steps_taken = self.step_number;

        match result {
            Ok((answer, state)) => {
                info!(?state, "Agent run completed");
                RunResult {
                    output: Some(answer),
                    state,
                    steps_taken,
                    token_usage,
                    timing,
                    error: None,
                }
            }
            Err(AgentError::Interrupted) => RunResult {
                output: None,
                state: RunState::Interrupted,
                steps_taken,
                token_usage,
                timing,
                error: Some(AgentError::Interrupted.to_string()),
            },
            Err(e) => {
                warn!(error = %e, "Agent run failed");
                RunResult {
                    output: None,
                    state: RunState::Failed,
                    steps_taken,
                    token_usage,
                    timing,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

// The shared loop.
impl Agent {
    async fn execute_loop(
        &mut self,
        max_steps: usize,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(Value, RunState)> {
        while self.step_number < max_steps {
            if self.interrupt_flag.load(Ordering::SeqCst) {
                return Err(AgentError::Interrupted);
            }

            self.maybe_plan(max_steps, events).await?;

            let (mut step, result) = self.advance_one_step(events).await;
            match result {
                Ok(StepResult::FinalAnswer(answer)) => {
                    if let Err(e) = self.guard_single_final_answer() {
                        step.is_final_answer = false;
                        step.error = Some(StepError::from(&e));
                        self.finalize_step(step, max_steps, events);
                        return Err(e);
                    }
                    match self.final_answer_checks.validate(&answer, &self.memory) {
                        Ok(()) => {
                            self.finalize_step(step, max_steps, events);
                            self.record_final_answer(&answer, max_steps);
                            return Ok((answer, RunState::Success));
                        }
                        Err(e) => {
                            warn!(error = %e, "Final answer rejected");
                            step.is_final_answer = false;
                            step.error = Some(StepError::from(&e));
                            self.monitor.record_error(&e.to_string());
                            self.finalize_step(step, max_steps, events);
                        }
                    }
                }
                Ok(StepResult::Continue) => {
                    self.finalize_step(step, max_steps, events);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(step = self.step_number, error = %e, "Recoverable step error");
                    step.error = Some(StepError::from(&e));
                    self.monitor.record_error(&e.to_string());
                    self.finalize_step(step, max_steps, events);
                }
                Err(e) => {
                    step.error = Some(StepError::from(&e));
                    self.finalize_step(step, max_steps, events);
                    return Err(e);
                }
            }
        }

        let answer = self.synthesize_final_answer(max_steps).await?;
        Ok((answer, RunState::MaxStepsReached))
    }

    /// Emit a planning step when the cadence calls for one.
    async fn maybe_plan(
        &mut self,
        max_steps: usize,
        events: &mut Vec<StreamEvent>,
    ) -> Result<()> {
        let Some(interval) = self.config.planning_interval else {
            return Ok(());
        };
        let next_step = self.step_number + 1;
        if next_step != 1 && (next_step - 1) % interval != 0 {
            return Ok(());
        }

        let is_first = next_step == 1;
        let remaining = max_steps - self.step_number;
        let remaining_text = remaining.to_string();

        let mut timing = Timing::begin();
        let messages = if is_first {
            vec![ChatMessage::user(render(
                &self.prompt_templates.planning.initial,
                &[("task", self.current_task.as_str())],
            ))]
        } else {
            let mut messages = self.memory.to_messages(false);
            messages.push(ChatMessage::user(render(
                &self.prompt_templates.planning.update,
                &[
                    ("task", self.current_task.as_str()),
                    ("remaining_steps", remaining_text.as_str()),
                ],
            )));
            messages
        };

        let options =
            GenerateOptions::new().with_stop_sequences(vec!["<end_plan>".to_owned()]);
        let response = self.model.generate(messages.clone(), options).await?;

        let mut plan = response.text().unwrap_or_default();
        if let Some(stripped) = plan.strip_suffix("<end_plan>") {
            plan = stripped.to_owned();
        }
        let plan = plan.trim().to_owned();
        timing.finish();

        debug!(step = next_step, "Planning step completed");
        events.push(StreamEvent::Plan(plan.clone()));

        let step = MemoryStep::Planning(PlanningStep {
            model_input_messages: messages,
            plan,
            model_output_message: response.message,
            timing,
            token_usage: response.token_usage,
        });
        let ctx = self.callback_context(max_steps);
        self.callbacks.dispatch(&step, &ctx);
        self.memory.steps.push(step);
        Ok(())
    }

    async fn advance_one_step(
        &mut self,
        events: &mut Vec<StreamEvent>,
    ) -> (ActionStep, Result<StepResult>) {
        self.step_number += 1;
        let mut step = ActionStep {
            step_number: self.step_number,
            timing: Timing::begin(),
            ..Default::default()
        };

        debug!(step = self.step_number, "Starting action step");
        let result = self.execute_step(&mut step, events).await;
        step.timing.finish();

        self.monitor
            .record_step(self.step_number, step.token_usage.as_ref());
        if let Some(calls) = &step.tool_calls {
            for call in calls {
                self.monitor.record_tool_call(&call.name);
            }
        }

        (step, result)
    }

    async fn execute_step(
        &mut self,
        step: &mut ActionStep,
        events: &mut Vec<StreamEvent>,
    ) -> Result<StepResult> {
        let messages = self.memory.to_messages(false);
        step.model_input_messages = Some(messages.clone());

        match &mut self.executor {
            AgentExecutor::ToolCalling => {
                let mut definitions = self.tools.definitions();
                definitions.extend(self.managed_agents.tool_definitions());
                let options = GenerateOptions::new()
                    .with_tools(definitions)
                    .with_stop_sequences(vec![
                        "Observation:".to_owned(),
                        "Calling tools:".to_owned(),
                    ]);

                let message =
                    generate_message(self.model.as_ref(), messages, options, step, events)
                        .await?;
                let calls = tool_calling::extract_tool_calls(&message)?;
                tool_calling::process_tool_calls(
                    calls,
                    step,
                    &self.tools,
                    &self.managed_agents,
                    &mut self.state,
                    self.config.max_tool_threads,
                    events,
                )
                .await
            }
            AgentExecutor::Code {
                executor,
                tags,
                structured_output,
            } => {
                let mut stops = vec!["Observation:".to_owned()];
                if tags.closing_is_safe_stop() {
                    stops.push(tags.closing.clone());
                }
                let mut options = GenerateOptions::new().with_stop_sequences(stops);
                if *structured_output {
                    options = options
                        .with_response_format(serde_json::json!({"type": "json_object"}));
                }

                let message =
                    generate_message(self.model.as_ref(), messages, options, step, events)
                        .await?;
                let content = message.text_content().unwrap_or_default();

                let code = if *structured_output {
                    code::parse_structured_code_action(&content)?
                } else {
                    code::parse_code_action(&content, tags)?
                };
                step.code_action = Some(code.clone());

                executor.send_variables(&self.state);
                match executor.execute(&code).await {
                    Ok(result) => {
                        let truncated = truncate_for_observation(
                            &result.output.to_string(),
                            MAX_OUTPUT_OBSERVATION_LENGTH,
                        );
                        step.observations = Some(format!(
                            "Execution logs:\n{}\nLast output from code snippet:\n{truncated}",
                            result.logs
                        ));
                        if result.is_final_answer {
                            step.is_final_answer = true;
                            step.action_output = Some(result.output.clone());
                            Ok(StepResult::FinalAnswer(result.output))
                        } else {
                            step.action_output = Some(result.output);
                            Ok(StepResult::Continue)
                        }
                    }
                    Err(failure) => {
                        step.observations =
                            Some(format!("Execution logs:\n{}", failure.logs));
                        let mut message = failure.error.to_string();
                        if matches!(failure.error, InterpreterError::UnauthorizedImport(_)) {
                            message.push_str(
                                ". Authorize it by adding the module to \
                                 additional_authorized_imports if it is safe for your use case",
                            );
                        }
                        Err(AgentError::execution(message))
                    }
                }
            }
        }
    }

    /// A memory records at most one final answer. Within one run the loop
    /// returns at the first accepted answer, so this guard can only trip
    /// when a continued run (`keep_memory`) tries to answer again; that is
    /// fatal, not a retry.
    fn guard_single_final_answer(&self) -> Result<()> {
        let already_answered = self.memory.steps.iter().any(|s| {
            matches!(s, MemoryStep::Action(a) if a.is_final_answer)
        });
        if already_answered {
            return Err(AgentError::execution(
                "the memory already records a final answer; refusing to accept a second one",
            ));
        }
        Ok(())
    }

    fn record_final_answer(&mut self, answer: &Value, max_steps: usize) {
        let step = MemoryStep::FinalAnswer(FinalAnswerStep {
            output: answer.clone(),
        });
        let ctx = self.callback_context(max_steps);
        self.callbacks.dispatch(&step, &ctx);
        self.memory.steps.push(step);
    }

    fn finalize_step(
        &mut self,
        step: ActionStep,
        max_steps: usize,
        events: &mut Vec<StreamEvent>,
    ) {
        events.push(StreamEvent::StepComplete {
            step: step.step_number,
            action_step: Box::new(step.clone()),
        });
        let step = MemoryStep::Action(step);
        let ctx = self.callback_context(max_steps);
        self.callbacks.dispatch(&step, &ctx);
        self.memory.steps.push(step);
    }

    /// One extra model call that synthesizes an answer from the memory when
    /// the step budget runs out. Appends the synthesized action step.
    async fn synthesize_final_answer(&mut self, max_steps: usize) -> Result<Value> {
        info!(max_steps, "Max steps reached, synthesizing final answer");

        let mut messages = vec![ChatMessage::system(
            self.prompt_templates.final_answer.pre_messages.clone(),
        )];
        messages.extend(self.memory.to_messages(false).into_iter().skip(1));
        messages.push(ChatMessage::user(render(
            &self.prompt_templates.final_answer.post_messages,
            &[("task", self.current_task.as_str())],
        )));

        let mut timing = Timing::begin();
        let response = self
            .model
            .generate(messages.clone(), GenerateOptions::new())
            .await?;
        timing.finish();

        let answer = Value::String(response.text().unwrap_or_default());

        let step = ActionStep {
            step_number: self.step_number + 1,
            timing,
            model_input_messages: Some(messages),
            model_output: response.message.text_content(),
            model_output_message: Some(response.message),
            error: Some(StepError::from(&AgentError::max_steps(max_steps))),
            action_output: Some(answer.clone()),
            token_usage: response.token_usage,
            ..Default::default()
        };
        let mut events = Vec::new();
        self.finalize_step(step, max_steps, &mut events);
        self.record_final_answer(&answer, max_steps);
        Ok(answer)
    }

    fn callback_context(&self, max_steps: usize) -> CallbackContext {
        CallbackContext::new(self.step_number, max_steps)
            .with_agent_name(self.name().to_owned())
    }
}

// Prompt rendering.
impl Agent {
    fn render_system_prompt(&self) -> String {
        let tool_descriptions = match &self.executor {
            AgentExecutor::ToolCalling => self
                .tools
                .definitions()
                .iter()
                .map(|def| {
                    format!(
                        "- {}: {}\n    Takes inputs: {}\n",
                        def.name,
                        def.description,
                        def.parameters
                            .get("properties")
                            .cloned()
                            .unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join(""),
            AgentExecutor::Code { .. } => {
                let mut rendered = String::new();
                for signature in self.tools.code_signatures() {
                    let _ = writeln!(rendered, "{signature}");
                }
                rendered
            }
        };

        let managed_section = if self.managed_agents.is_empty() {
            String::new()
        } else {
            let mut section = String::from(
                "\nYou can also give tasks to team members. Calling a team member works like \
                 calling a tool: the only argument you can give is 'task', a long string \
                 explaining your task. Here is a list of the team members that you can call:\n",
            );
            for info in self.managed_agents.infos() {
                let _ = writeln!(section, "- {}: {}", info.name, info.description);
            }
            section
        };

        let custom = self
            .config
            .custom_instructions
            .as_deref()
            .map(|text| format!("\n{text}\n"))
            .unwrap_or_default();

        let authorized_imports = match &self.executor {
            AgentExecutor::Code { executor, .. } => executor.authorized_imports().join(", "),
            AgentExecutor::ToolCalling => String::new(),
        };

        let (opening, closing) = match &self.executor {
            AgentExecutor::Code { tags, .. } => (tags.opening.clone(), tags.closing.clone()),
            AgentExecutor::ToolCalling => (String::new(), String::new()),
        };

        render(
            &self.prompt_templates.system_prompt,
            &[
                ("tool_descriptions", tool_descriptions.as_str()),
                ("managed_agents_section", managed_section.as_str()),
                ("custom_instructions", custom.as_str()),
                ("authorized_imports", authorized_imports.as_str()),
                ("code_block_opening_tag", opening.as_str()),
                ("code_block_closing_tag", closing.as_str()),
            ],
        )
    }
}

const MAX_OUTPUT_OBSERVATION_LENGTH: usize = 4_000;

fn truncate_for_observation(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, _)| *i < limit)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    format!("{}\n..._Output was truncated_...", &text[..cut])
}

/// Drive a model call for one step, streaming when the backend supports it.
async fn generate_message(
    model: &dyn Model,
    messages: Vec<ChatMessage>,
    options: GenerateOptions,
    step: &mut ActionStep,
    events: &mut Vec<StreamEvent>,
) -> Result<ChatMessage> {
    let stop_sequences = options.stop_sequences.clone();

    let mut message = if model.supports_streaming() {
        let mut stream = model.generate_stream(messages, options).await?;
        let mut deltas = Vec::new();
        while let Some(result) = stream.next().await {
            let delta = result?;
            if let Some(content) = &delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta(content.clone()));
                }
            }
            if let Some(usage) = delta.token_usage {
                events.push(StreamEvent::TokenUsage(usage));
            }
            deltas.push(delta);
        }
        aggregate_stream_deltas(&deltas)
    } else {
        let response = model.generate(messages, options).await?;
        if let Some(text) = response.text() {
            events.push(StreamEvent::TextDelta(text));
        }
        if let Some(usage) = response.token_usage {
            events.push(StreamEvent::TokenUsage(usage));
        }
        let mut message = response.message;
        if message.token_usage.is_none() {
            message.token_usage = response.token_usage;
        }
        message
    };

    // Client-side stop handling for backends without server-side support.
    if !model.supports_stop_parameter() {
        if let (Some(MessageContent::Text(text)), Some(stops)) =
            (&message.content, &stop_sequences)
        {
            let truncated = truncate_at_stop(text, stops);
            if truncated.len() != text.len() {
                message.content = Some(MessageContent::Text(truncated));
            }
        }
    }

    step.token_usage = message.token_usage;
    step.model_output = message.text_content();
    step.model_output_message = Some(message.clone());
    Ok(message)
}

/// Adapter exposing an [`Agent`] as a [`ManagedAgent`].
struct ManagedRunner {
    name: String,
    description: String,
    inner: tokio::sync::Mutex<Agent>,
}

#[async_trait]
impl ManagedAgent for ManagedRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(
        &self,
        task: &str,
        _additional_args: Option<HashMap<String, Value>>,
    ) -> Result<String> {
        let mut agent = self.inner.lock().await;
        agent.call_as_managed(task).await
    }

    fn provide_run_summary(&self) -> bool {
        false
    }
}
