//! The reserved run-terminating tool.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::multimodal::AgentValue;
use crate::tool::{ParamType, Tool, ToolError, ToolInputs, ToolParam, FINAL_ANSWER_TOOL};

/// Provides the final answer to the task. Calling it ends the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalAnswerTool;

impl FinalAnswerTool {
    /// Create the tool.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        FINAL_ANSWER_TOOL
    }

    fn description(&self) -> &str {
        "Provides a final answer to the given problem."
    }

    fn inputs(&self) -> &ToolInputs {
        static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
        INPUTS.get_or_init(|| {
            ToolInputs::new().param(
                "answer",
                ToolParam::new(ParamType::Any, "The final answer to the problem"),
            )
        })
    }

    fn output_type(&self) -> ParamType {
        ParamType::Any
    }

    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        Ok(AgentValue::Json(
            args.get("answer").cloned().unwrap_or(Value::Null),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::invoke_tool;
    use serde_json::json;

    #[tokio::test]
    async fn test_passes_answer_through() {
        let result = invoke_tool(&FinalAnswerTool::new(), &json!({"answer": 42}), false)
            .await
            .unwrap();
        assert_eq!(result, AgentValue::Json(json!(42)));
    }

    #[tokio::test]
    async fn test_bare_value_binds_answer() {
        let result = invoke_tool(&FinalAnswerTool::new(), &json!("done"), false)
            .await
            .unwrap();
        assert_eq!(result, AgentValue::Json(json!("done")));
    }
}
