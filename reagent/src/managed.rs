//! Managed sub-agents: agents exposed to a parent as if they were tools.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::tool::{inputs_to_json_schema, ToolDefinition, ToolInputs, ToolParam};

/// An agent callable by a parent agent.
///
/// Implementations receive the task prose and return a textual report. The
/// parent treats the sub-agent like any other tool call target.
#[async_trait]
pub trait ManagedAgent: Send + Sync {
    /// Unique name the parent dispatches on.
    fn name(&self) -> &str;

    /// Description shown in the parent's prompt.
    fn description(&self) -> &str;

    /// Run the sub-agent on a task.
    ///
    /// # Errors
    ///
    /// Any fatal agent error from the sub-run.
    async fn call(&self, task: &str, additional_args: Option<HashMap<String, Value>>)
        -> Result<String>;

    /// Whether the report should append a summary of the sub-run's work.
    fn provide_run_summary(&self) -> bool {
        false
    }
}

/// Lightweight info used when rendering the parent's prompt.
#[derive(Debug, Clone)]
pub struct ManagedAgentInfo {
    /// The sub-agent's name.
    pub name: String,
    /// The sub-agent's description.
    pub description: String,
}

/// Name-keyed registry of managed sub-agents.
#[derive(Default)]
pub struct ManagedAgentRegistry {
    agents: Vec<Box<dyn ManagedAgent>>,
}

impl ManagedAgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sub-agent. Returns `false` when the name is taken.
    pub fn add(&mut self, agent: Box<dyn ManagedAgent>) -> bool {
        if self.contains(agent.name()) {
            return false;
        }
        self.agents.push(agent);
        true
    }

    /// Whether a sub-agent with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents.iter().any(|a| a.name() == name)
    }

    /// Look up a sub-agent by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn ManagedAgent> {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .map(AsRef::as_ref)
    }

    /// All registered names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Number of registered sub-agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Prompt-ready infos for every sub-agent.
    #[must_use]
    pub fn infos(&self) -> Vec<ManagedAgentInfo> {
        self.agents
            .iter()
            .map(|a| ManagedAgentInfo {
                name: a.name().to_owned(),
                description: a.description().to_owned(),
            })
            .collect()
    }

    /// Tool definitions advertising each sub-agent on the structured
    /// tool-call channel: one `task` parameter of type string.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.agents
            .iter()
            .map(|a| {
                let inputs = ToolInputs::new().param(
                    "task",
                    ToolParam::string(
                        "Detailed description of the task to delegate to this agent",
                    ),
                );
                ToolDefinition {
                    name: a.name().to_owned(),
                    description: a.description().to_owned(),
                    parameters: inputs_to_json_schema(&inputs),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ManagedAgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedAgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ManagedAgent for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes the task back."
        }
        async fn call(
            &self,
            task: &str,
            _additional_args: Option<HashMap<String, Value>>,
        ) -> Result<String> {
            Ok(format!("echo: {task}"))
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ManagedAgentRegistry::new();
        assert!(registry.add(Box::new(Echo)));
        assert!(!registry.add(Box::new(Echo)));

        let agent = registry.get("echo").expect("registered");
        let report = agent.call("say hi", None).await.unwrap();
        assert_eq!(report, "echo: say hi");
    }

    #[test]
    fn test_tool_definitions_have_task_param() {
        let mut registry = ManagedAgentRegistry::new();
        registry.add(Box::new(Echo));
        let defs = registry.tool_definitions();
        assert_eq!(defs.len(), 1);
        assert!(defs[0].parameters["properties"]["task"].is_object());
    }
}
