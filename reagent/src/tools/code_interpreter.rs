//! Tool wrapping the local sandbox, for tool-calling agents that want to
//! evaluate code snippets.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::interpreter::LocalExecutor;
use crate::multimodal::AgentValue;
use crate::tool::{Tool, ToolError, ToolInputs, ToolParam};

/// Evaluates a code snippet in the restricted sandbox and returns its logs
/// and final value.
pub struct CodeInterpreterTool {
    executor: Mutex<LocalExecutor>,
}

impl Default for CodeInterpreterTool {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeInterpreterTool {
    /// Create the tool with a fresh sandbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: Mutex::new(LocalExecutor::new()),
        }
    }

    /// Create the tool with extra authorized imports.
    #[must_use]
    pub fn with_authorized_imports(imports: &[String]) -> Self {
        Self {
            executor: Mutex::new(LocalExecutor::new().with_additional_imports(imports)),
        }
    }
}

impl std::fmt::Debug for CodeInterpreterTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeInterpreterTool").finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for CodeInterpreterTool {
    fn name(&self) -> &str {
        "code_interpreter"
    }

    fn description(&self) -> &str {
        "Evaluates a code snippet in a restricted interpreter. Returns the captured print \
         output and the value of the last expression. State persists between calls."
    }

    fn inputs(&self) -> &ToolInputs {
        static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
        INPUTS.get_or_init(|| {
            ToolInputs::new().param(
                "code",
                ToolParam::string("The code snippet to evaluate"),
            )
        })
    }

    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();

        let mut executor = self.executor.lock().await;
        match executor.execute(code).await {
            Ok(result) => Ok(AgentValue::text(format!(
                "Logs:\n{}\nOutput: {}",
                result.logs, result.output
            ))),
            Err(failure) => Err(ToolError::execution(format!(
                "{}\nLogs:\n{}",
                failure.error, failure.logs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::invoke_tool;
    use serde_json::json;

    #[tokio::test]
    async fn test_evaluates_snippet() {
        let tool = CodeInterpreterTool::new();
        let result = invoke_tool(&tool, &json!({"code": "print(\"hi\")\n2 + 3"}), true)
            .await
            .unwrap();
        let text = result.to_display_string();
        assert!(text.contains("hi"));
        assert!(text.contains("Output: 5"));
    }

    #[tokio::test]
    async fn test_state_persists_between_calls() {
        let tool = CodeInterpreterTool::new();
        invoke_tool(&tool, &json!({"code": "x = 41"}), true)
            .await
            .unwrap();
        let result = invoke_tool(&tool, &json!({"code": "x + 1"}), true)
            .await
            .unwrap();
        assert!(result.to_display_string().contains("Output: 42"));
    }

    #[tokio::test]
    async fn test_error_is_tool_error() {
        let tool = CodeInterpreterTool::new();
        let err = invoke_tool(&tool, &json!({"code": "nope_undefined"}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }
}
