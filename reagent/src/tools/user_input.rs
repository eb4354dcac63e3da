//! Tool that asks the human operator a question on stdin.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::multimodal::AgentValue;
use crate::tool::{Tool, ToolError, ToolInputs, ToolParam};

/// Asks the user for input on the terminal and returns their reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserInputTool;

impl UserInputTool {
    /// Create the tool.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for UserInputTool {
    fn name(&self) -> &str {
        "user_input"
    }

    fn description(&self) -> &str {
        "Asks for user's input on a specific question."
    }

    fn inputs(&self) -> &ToolInputs {
        static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
        INPUTS.get_or_init(|| {
            ToolInputs::new().param(
                "question",
                ToolParam::string("The question to ask the user"),
            )
        })
    }

    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        let question = args
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{question} => Type your answer here: ").as_bytes())
            .await
            .map_err(|e| ToolError::execution(format!("failed to write prompt: {e}")))?;
        stdout
            .flush()
            .await
            .map_err(|e| ToolError::execution(format!("failed to flush prompt: {e}")))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| ToolError::execution(format!("failed to read input: {e}")))?;

        Ok(AgentValue::text(line.trim_end().to_owned()))
    }
}
