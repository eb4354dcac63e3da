//! Restricted in-process evaluator backing the code agent.
//!
//! Code actions run in a small deterministic expression language: tools are
//! injected as ordinary callables, `final_answer(value)` records the run's
//! answer, `print` output is captured into the execution logs, and imports
//! are checked against an allow-list. This is a denylist-by-convention
//! sandbox, not a security boundary.

mod ast;
mod builtins;
mod eval;
mod lexer;
mod value;

pub use ast::parse;
pub use value::Value;

use std::collections::{HashMap, HashSet};

use serde_json::Value as Json;
use thiserror::Error;
use tracing::debug;

use crate::error::AgentError;
use crate::tool::{SharedTool, ToolBox};

use eval::Evaluator;

/// Modules importable in every sandbox unless the agent narrows the list.
pub const BASE_AUTHORIZED_IMPORTS: &[&str] = &["math", "json"];

/// Default cap on captured print output, in bytes.
pub const DEFAULT_MAX_PRINT_OUTPUTS_LENGTH: usize = 50_000;

/// Default cap on interpreter operations per execution.
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

/// Errors raised inside the sandbox.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum InterpreterError {
    /// The snippet failed to tokenize or parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A name is not defined.
    #[error("name error: {0}")]
    Name(String),

    /// An operation was applied to the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// A value was out of range or otherwise invalid.
    #[error("value error: {0}")]
    Value(String),

    /// An import was not in the authorized list.
    #[error("import of '{0}' is not authorized")]
    UnauthorizedImport(String),

    /// The per-execution operation budget was exhausted.
    #[error("exceeded the operation limit of {0}; the code probably loops forever")]
    OperationLimit(u64),

    /// A tool raised during a sandboxed call.
    #[error("tool call failed: {0}")]
    Tool(String),
}

impl InterpreterError {
    /// Create a syntax error.
    #[must_use]
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }
}

impl From<InterpreterError> for AgentError {
    fn from(err: InterpreterError) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Result of one sandbox execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The recorded final answer, or the last expression statement's value.
    pub output: Json,
    /// Captured print output, truncated to the configured limit.
    pub logs: String,
    /// Whether `final_answer` was invoked.
    pub is_final_answer: bool,
}

/// A failed sandbox execution: the error plus whatever was printed before
/// it was raised.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    /// The sandbox error.
    pub error: InterpreterError,
    /// Captured print output up to the failure.
    pub logs: String,
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

/// The code agent's local executor.
///
/// Variables persist across executions within one run, so a multi-step
/// agent can build on earlier results. [`LocalExecutor::reset`] clears them
/// for a fresh run.
pub struct LocalExecutor {
    tools: HashMap<String, SharedTool>,
    variables: HashMap<String, Value>,
    imported: HashSet<String>,
    authorized_imports: Vec<String>,
    max_print_outputs_length: usize,
    max_operations: u64,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    /// Create an executor with the base import allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            variables: HashMap::new(),
            imported: HashSet::new(),
            authorized_imports: BASE_AUTHORIZED_IMPORTS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            max_print_outputs_length: DEFAULT_MAX_PRINT_OUTPUTS_LENGTH,
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }

    /// Extend the import allow-list with agent-declared extras.
    #[must_use]
    pub fn with_additional_imports(mut self, extras: &[String]) -> Self {
        for module in extras {
            if !self.authorized_imports.contains(module) {
                self.authorized_imports.push(module.clone());
            }
        }
        self
    }

    /// Cap the captured print output length.
    #[must_use]
    pub const fn with_max_print_outputs_length(mut self, limit: usize) -> Self {
        self.max_print_outputs_length = limit;
        self
    }

    /// Cap the per-execution operation count.
    #[must_use]
    pub const fn with_max_operations(mut self, limit: u64) -> Self {
        self.max_operations = limit;
        self
    }

    /// The current import allow-list.
    #[must_use]
    pub fn authorized_imports(&self) -> &[String] {
        &self.authorized_imports
    }

    /// Expose every tool in the box as a sandbox callable.
    pub fn send_tools(&mut self, tools: &ToolBox) {
        for tool in tools.iter() {
            self.tools.insert(tool.name().to_owned(), tool.clone());
        }
    }

    /// Inject state variables as sandbox locals.
    pub fn send_variables(&mut self, variables: &HashMap<String, Json>) {
        for (name, value) in variables {
            self.variables
                .insert(name.clone(), Value::from_json(value));
        }
    }

    /// A snapshot of the sandbox variables, in JSON form.
    #[must_use]
    pub fn variables(&self) -> HashMap<String, Json> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Clear all run state: variables and recorded imports.
    pub fn reset(&mut self) {
        self.variables.clear();
        self.imported.clear();
    }

    /// Execute one code action.
    ///
    /// # Errors
    ///
    /// [`ExecutionFailure`] carrying the sandbox error and any logs captured
    /// before it was raised.
    pub async fn execute(&mut self, code: &str) -> Result<ExecutionResult, ExecutionFailure> {
        let program = parse(code).map_err(|error| ExecutionFailure {
            error,
            logs: String::new(),
        })?;

        let mut logs = String::new();
        let mut final_answer = None;

        let mut evaluator = Evaluator {
            variables: &mut self.variables,
            tools: &self.tools,
            authorized_imports: &self.authorized_imports,
            imported: &mut self.imported,
            final_answer: &mut final_answer,
            logs: &mut logs,
            ops: 0,
            max_ops: self.max_operations,
        };

        let outcome = evaluator.run(&program).await;
        let logs = truncate_logs(logs, self.max_print_outputs_length);

        match outcome {
            Ok(last_value) => {
                let is_final_answer = final_answer.is_some();
                let output = final_answer.unwrap_or(last_value).to_json();
                debug!(is_final_answer, "code action executed");
                Ok(ExecutionResult {
                    output,
                    logs,
                    is_final_answer,
                })
            }
            Err(error) => Err(ExecutionFailure { error, logs }),
        }
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("authorized_imports", &self.authorized_imports)
            .finish_non_exhaustive()
    }
}

fn truncate_logs(mut logs: String, limit: usize) -> String {
    if logs.len() > limit {
        let cut = logs
            .char_indices()
            .take_while(|(i, _)| *i < limit)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        logs.truncate(cut);
        logs.push_str("\n..._Print outputs were truncated_...");
    }
    logs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimodal::AgentValue;
    use crate::tool::{Tool, ToolInputs, ToolParam};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Add two numbers."
        }
        fn inputs(&self) -> &ToolInputs {
            static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
            INPUTS.get_or_init(|| {
                ToolInputs::new()
                    .param("a", ToolParam::number("First operand"))
                    .param("b", ToolParam::number("Second operand"))
            })
        }
        async fn forward(
            &self,
            args: serde_json::Map<String, Json>,
        ) -> Result<AgentValue, crate::tool::ToolError> {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            Ok(AgentValue::Json(json!(a + b)))
        }
    }

    fn executor_with_add() -> LocalExecutor {
        let mut toolbox = ToolBox::new();
        toolbox.add(Arc::new(AddTool)).unwrap();
        let mut executor = LocalExecutor::new();
        executor.send_tools(&toolbox);
        executor
    }

    #[tokio::test]
    async fn test_final_answer_records_value() {
        let mut executor = LocalExecutor::new();
        let result = executor.execute("final_answer(2+2)").await.unwrap();
        assert!(result.is_final_answer);
        assert_eq!(result.output, json!(4));
    }

    #[tokio::test]
    async fn test_last_expression_is_output() {
        let mut executor = LocalExecutor::new();
        let result = executor.execute("x = 3\nx * 2").await.unwrap();
        assert!(!result.is_final_answer);
        assert_eq!(result.output, json!(6));
    }

    #[tokio::test]
    async fn test_assignment_only_yields_null() {
        let mut executor = LocalExecutor::new();
        let result = executor.execute("x = 3").await.unwrap();
        assert_eq!(result.output, json!(null));
    }

    #[tokio::test]
    async fn test_print_captured_in_logs() {
        let mut executor = LocalExecutor::new();
        let result = executor
            .execute("print(\"working on\", 42)\nprint(\"done\")\n1")
            .await
            .unwrap();
        assert_eq!(result.logs, "working on 42\ndone\n");
        assert_eq!(result.output, json!(1));
    }

    #[tokio::test]
    async fn test_logs_truncated() {
        let mut executor = LocalExecutor::new().with_max_print_outputs_length(20);
        let result = executor
            .execute("for i in range(50) {\n  print(\"xxxxxxxxxx\")\n}")
            .await
            .unwrap();
        assert!(result.logs.contains("truncated"));
        assert!(result.logs.len() < 100);
    }

    #[tokio::test]
    async fn test_tool_call_with_kwargs() {
        let mut executor = executor_with_add();
        let result = executor
            .execute("result = add(a=1, b=2)\nfinal_answer(result)")
            .await
            .unwrap();
        assert!(result.is_final_answer);
        assert_eq!(result.output, json!(3.0));
    }

    #[tokio::test]
    async fn test_tool_rejects_positional_arguments() {
        let mut executor = executor_with_add();
        let failure = executor.execute("add(1, 2)").await.unwrap_err();
        assert!(failure.error.to_string().contains("keyword arguments only"));
    }

    #[tokio::test]
    async fn test_unauthorized_import_is_recognizable() {
        let mut executor = LocalExecutor::new();
        let failure = executor.execute("import os").await.unwrap_err();
        assert_eq!(
            failure.error,
            InterpreterError::UnauthorizedImport("os".to_owned())
        );
    }

    #[tokio::test]
    async fn test_additional_imports_extend_allow_list() {
        let mut executor =
            LocalExecutor::new().with_additional_imports(&["statistics".to_owned()]);
        // Authorized but unimplemented modules import as inert names.
        assert!(executor.execute("import statistics\n1").await.is_ok());
    }

    #[tokio::test]
    async fn test_math_module_usable_after_import() {
        let mut executor = LocalExecutor::new();
        let result = executor
            .execute("import math\nfinal_answer(math.sqrt(16))")
            .await
            .unwrap();
        assert_eq!(result.output, json!(4.0));
    }

    #[tokio::test]
    async fn test_module_requires_import() {
        let mut executor = LocalExecutor::new();
        let failure = executor.execute("math.sqrt(16)").await.unwrap_err();
        assert!(failure.error.to_string().contains("did you forget to import"));
    }

    #[tokio::test]
    async fn test_variables_persist_across_executions() {
        let mut executor = LocalExecutor::new();
        executor.execute("counter = 10").await.unwrap();
        let result = executor.execute("counter + 5").await.unwrap();
        assert_eq!(result.output, json!(15));

        executor.reset();
        assert!(executor.execute("counter").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_state_variables() {
        let mut executor = LocalExecutor::new();
        let mut state = HashMap::new();
        state.insert("payload".to_owned(), json!({"count": 7}));
        executor.send_variables(&state);

        let result = executor.execute("payload[\"count\"] * 2").await.unwrap();
        assert_eq!(result.output, json!(14));
    }

    #[tokio::test]
    async fn test_control_flow() {
        let mut executor = LocalExecutor::new();
        let code = "\
total = 0
for i in range(10) {
  if i % 2 == 0 {
    total = total + i
  }
}
final_answer(total)";
        let result = executor.execute(code).await.unwrap();
        assert_eq!(result.output, json!(20));
    }

    #[tokio::test]
    async fn test_while_with_break() {
        let mut executor = LocalExecutor::new();
        let code = "\
n = 0
while true {
  n = n + 1
  if n >= 5 {
    break
  }
}
n";
        let result = executor.execute(code).await.unwrap();
        assert_eq!(result.output, json!(5));
    }

    #[tokio::test]
    async fn test_operation_limit_stops_infinite_loop() {
        let mut executor = LocalExecutor::new().with_max_operations(10_000);
        let failure = executor.execute("while true {\n  x = 1\n}").await.unwrap_err();
        assert!(matches!(failure.error, InterpreterError::OperationLimit(_)));
    }

    #[tokio::test]
    async fn test_error_preserves_logs() {
        let mut executor = LocalExecutor::new();
        let failure = executor
            .execute("print(\"before the crash\")\nundefined_name")
            .await
            .unwrap_err();
        assert!(failure.logs.contains("before the crash"));
        assert!(matches!(failure.error, InterpreterError::Name(_)));
    }

    #[tokio::test]
    async fn test_string_operations() {
        let mut executor = LocalExecutor::new();
        let result = executor
            .execute("parts = split(\"a,b,c\", \",\")\njoin(\"-\", parts)")
            .await
            .unwrap();
        assert_eq!(result.output, json!("a-b-c"));
    }

    #[tokio::test]
    async fn test_membership_operator() {
        let mut executor = LocalExecutor::new();
        let result = executor
            .execute("xs = [1, 2, 3]\nfinal_answer(2 in xs)")
            .await
            .unwrap();
        assert_eq!(result.output, json!(true));
    }

    #[tokio::test]
    async fn test_final_answer_keeps_executing() {
        let mut executor = LocalExecutor::new();
        let result = executor
            .execute("final_answer(1)\nprint(\"after\")")
            .await
            .unwrap();
        assert!(result.is_final_answer);
        assert_eq!(result.output, json!(1));
        assert!(result.logs.contains("after"));
    }
}
