//! Agent configuration.

/// Static configuration for an [`Agent`](super::Agent).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name, required when used as a managed sub-agent.
    pub name: Option<String>,
    /// Description shown to a managing agent.
    pub description: Option<String>,
    /// Step budget for one run.
    pub max_steps: usize,
    /// Insert a planning step before step 1 and then every N action steps.
    pub planning_interval: Option<usize>,
    /// Bound on concurrent tool calls within one step; 1 means sequential.
    pub max_tool_threads: usize,
    /// Extra text appended to the system prompt.
    pub custom_instructions: Option<String>,
    /// Append a work summary when reporting as a managed sub-agent.
    pub provide_run_summary: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            max_steps: 20,
            planning_interval: None,
            max_tool_threads: 1,
            custom_instructions: None,
            provide_run_summary: false,
        }
    }
}

/// Per-run options for [`Agent::run_with`](super::Agent::run_with).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Keep the existing memory instead of starting fresh.
    pub keep_memory: bool,
    /// Images attached to the task.
    pub images: Vec<crate::multimodal::AgentImage>,
    /// Additional arguments merged into agent state and appended to the
    /// task prose.
    pub additional_args: std::collections::HashMap<String, serde_json::Value>,
    /// Override the configured step budget for this run.
    pub max_steps: Option<usize>,
}
