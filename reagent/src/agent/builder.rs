//! Agent construction.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::callback::CallbackRegistry;
use crate::error::{AgentError, Result};
use crate::interpreter::LocalExecutor;
use crate::managed::{ManagedAgent, ManagedAgentRegistry};
use crate::memory::AgentMemory;
use crate::models::Model;
use crate::monitor::Monitor;
use crate::prompts::PromptTemplates;
use crate::tool::{SharedTool, ToolBox, FINAL_ANSWER_TOOL};
use crate::tools::FinalAnswerTool;

use super::checks::FinalAnswerChecks;
use super::code::CodeTags;
use super::config::AgentConfig;
use super::{Agent, AgentExecutor};

enum AgentKind {
    ToolCalling,
    Code,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    kind: AgentKind,
    model: Option<Box<dyn Model>>,
    tools: Vec<SharedTool>,
    managed_agents: Vec<Box<dyn ManagedAgent>>,
    config: AgentConfig,
    prompt_templates: Option<PromptTemplates>,
    final_answer_checks: FinalAnswerChecks,
    callbacks: CallbackRegistry,
    // Code-strategy options.
    code_tags: CodeTags,
    structured_output: bool,
    additional_authorized_imports: Vec<String>,
    max_print_outputs_length: Option<usize>,
}

impl AgentBuilder {
    fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            model: None,
            tools: Vec::new(),
            managed_agents: Vec::new(),
            config: AgentConfig::default(),
            prompt_templates: None,
            final_answer_checks: FinalAnswerChecks::new(),
            callbacks: CallbackRegistry::new(),
            code_tags: CodeTags::default(),
            structured_output: false,
            additional_authorized_imports: Vec::new(),
            max_print_outputs_length: None,
        }
    }

    /// Builder for a tool-calling agent.
    #[must_use]
    pub fn tool_calling() -> Self {
        Self::new(AgentKind::ToolCalling)
    }

    /// Builder for a code agent.
    #[must_use]
    pub fn code() -> Self {
        Self::new(AgentKind::Code)
    }

    /// Set the model backend.
    #[must_use]
    pub fn model(mut self, model: Box<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn tool(mut self, tool: SharedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add several tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = SharedTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Add a managed sub-agent.
    #[must_use]
    pub fn managed_agent(mut self, agent: Box<dyn ManagedAgent>) -> Self {
        self.managed_agents.push(agent);
        self
    }

    /// Set the agent name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set the agent description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Set the step budget.
    #[must_use]
    pub const fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    /// Insert a planning step before step 1 and then every `interval`
    /// action steps.
    #[must_use]
    pub const fn planning_interval(mut self, interval: usize) -> Self {
        self.config.planning_interval = Some(interval);
        self
    }

    /// Bound concurrent tool calls within one step.
    #[must_use]
    pub const fn max_tool_threads(mut self, threads: usize) -> Self {
        self.config.max_tool_threads = threads;
        self
    }

    /// Append custom instructions to the system prompt.
    #[must_use]
    pub fn custom_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.custom_instructions = Some(instructions.into());
        self
    }

    /// Append a work summary when reporting as a managed sub-agent.
    #[must_use]
    pub const fn provide_run_summary(mut self, provide: bool) -> Self {
        self.config.provide_run_summary = provide;
        self
    }

    /// Replace the prompt templates.
    #[must_use]
    pub fn prompt_templates(mut self, templates: PromptTemplates) -> Self {
        self.prompt_templates = Some(templates);
        self
    }

    /// Add a final-answer check.
    #[must_use]
    pub fn final_answer_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&serde_json::Value, &AgentMemory) -> Result<()> + Send + Sync + 'static,
    {
        self.final_answer_checks.push(check);
        self
    }

    /// Register a step callback for every variant.
    #[must_use]
    pub fn step_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&crate::memory::MemoryStep, &crate::callback::CallbackContext)
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.register_any(callback);
        self
    }

    /// Override the code-block tag pair (code strategy only).
    #[must_use]
    pub fn code_tags(mut self, tags: CodeTags) -> Self {
        self.code_tags = tags;
        self
    }

    /// Parse code actions from structured JSON output instead of tags.
    #[must_use]
    pub const fn structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    /// Authorize extra sandbox imports (code strategy only).
    #[must_use]
    pub fn additional_authorized_imports(
        mut self,
        imports: impl IntoIterator<Item = String>,
    ) -> Self {
        self.additional_authorized_imports.extend(imports);
        self
    }

    /// Cap the captured print output length (code strategy only).
    #[must_use]
    pub const fn max_print_outputs_length(mut self, limit: usize) -> Self {
        self.max_print_outputs_length = Some(limit);
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// Missing model, duplicate names across tools / managed agents / the
    /// agent itself, or invalid tool declarations.
    pub fn build(self) -> Result<Agent> {
        let model = self
            .model
            .ok_or_else(|| AgentError::generation("agent has no model configured"))?;

        let mut tools = ToolBox::new();
        tools
            .add(Arc::new(FinalAnswerTool::new()))
            .map_err(AgentError::from)?;
        for tool in self.tools {
            if tool.name() == FINAL_ANSWER_TOOL {
                continue; // the reserved tool is always pre-registered
            }
            tools.add(tool).map_err(AgentError::from)?;
        }

        let mut managed_agents = ManagedAgentRegistry::new();
        for agent in self.managed_agents {
            let name = agent.name().to_owned();
            if tools.contains(&name) {
                return Err(AgentError::tool_call(format!(
                    "managed agent '{name}' collides with a tool of the same name"
                )));
            }
            if self.config.name.as_deref() == Some(name.as_str()) {
                return Err(AgentError::tool_call(format!(
                    "managed agent '{name}' collides with the agent's own name"
                )));
            }
            if !managed_agents.add(agent) {
                return Err(AgentError::tool_call(format!(
                    "a managed agent named '{name}' is already registered"
                )));
            }
        }

        let (executor, default_templates) = match self.kind {
            AgentKind::ToolCalling => {
                (AgentExecutor::ToolCalling, PromptTemplates::tool_calling_default())
            }
            AgentKind::Code => {
                let mut local = LocalExecutor::new()
                    .with_additional_imports(&self.additional_authorized_imports);
                if let Some(limit) = self.max_print_outputs_length {
                    local = local.with_max_print_outputs_length(limit);
                }
                local.send_tools(&tools);
                (
                    AgentExecutor::Code {
                        executor: local,
                        tags: self.code_tags,
                        structured_output: self.structured_output,
                    },
                    PromptTemplates::code_default(),
                )
            }
        };

        Ok(Agent {
            model,
            tools,
            managed_agents,
            config: self.config,
            memory: AgentMemory::default(),
            prompt_templates: self.prompt_templates.unwrap_or(default_templates),
            executor,
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            step_number: 0,
            state: HashMap::new(),
            final_answer_checks: self.final_answer_checks,
            monitor: Monitor::new(),
            callbacks: self.callbacks,
            current_task: String::new(),
        })
    }
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("tools", &self.tools.len())
            .field("managed_agents", &self.managed_agents.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
