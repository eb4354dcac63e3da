//! The tool contract and the name-keyed tool registry.
//!
//! A [`Tool`] declares its schema as data and implements a single async
//! `forward`. Everything around the invocation (one-time setup, argument
//! validation, wrapper sanitization) is handled by [`ToolBox::call`] so
//! individual tools stay small.

pub mod errors;
pub mod schema;

pub use errors::ToolError;
pub use schema::{
    inputs_to_json_schema, to_code_signature, validate_arguments, ParamType, ToolDefinition,
    ToolInputs, ToolParam,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::multimodal::AgentValue;

/// The reserved name of the run-terminating tool.
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// Names a tool may not take: evaluator keywords and builtin callables
/// shadowing these would make code actions ambiguous.
pub const RESERVED_TOOL_NAMES: &[&str] = &[
    "if", "else", "for", "while", "in", "and", "or", "not", "true", "false", "null", "break",
    "continue", "import", "print", "len", "str", "int", "float", "abs", "min", "max", "sum",
    "round", "range", "sorted", "join", "split", "type",
];

/// An agent-usable tool with a declared input schema.
///
/// Tools are shared references held by the agent; implementations must be
/// stateless or internally synchronized, because one agent may execute
/// several tool calls concurrently within a step.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name; a valid identifier outside the reserved set.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// The declared input schema.
    fn inputs(&self) -> &ToolInputs;

    /// The declared output type.
    fn output_type(&self) -> ParamType {
        ParamType::String
    }

    /// Optional JSON schema describing structured outputs.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Idempotent one-time initialization, run before the first call.
    ///
    /// # Errors
    ///
    /// A failure is surfaced as a tool-execution error.
    async fn setup(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool with validated keyword arguments.
    ///
    /// # Errors
    ///
    /// Implementation-specific execution errors.
    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError>;

    /// The tool as advertised to the structured tool-call channel.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: inputs_to_json_schema(self.inputs()),
        }
    }

    /// The OpenAI-style function descriptor for this tool.
    fn to_json_schema(&self) -> Value {
        self.definition().to_openai_schema()
    }

    /// The call signature rendered into the code agent's prompt.
    fn to_code_signature(&self) -> String {
        to_code_signature(
            self.name(),
            self.description(),
            self.inputs(),
            self.output_type(),
        )
    }
}

/// A shared tool reference.
pub type SharedTool = Arc<dyn Tool>;

/// Validate + sanitize + forward, without the registry's setup tracking.
///
/// When `sanitize_io` is set, wrapper-shaped argument values are unwrapped
/// to their raw payloads before validation, and the result is re-wrapped
/// according to the tool's declared output type.
///
/// # Errors
///
/// Validation or execution errors from the tool.
pub async fn invoke_tool(
    tool: &dyn Tool,
    arguments: &Value,
    sanitize_io: bool,
) -> Result<AgentValue, ToolError> {
    let arguments = if sanitize_io {
        sanitize_value(arguments)
    } else {
        arguments.clone()
    };

    let kwargs = validate_arguments(tool.inputs(), &arguments)?;
    let result = tool.forward(kwargs).await?;

    Ok(if sanitize_io {
        rewrap_output(result, tool.output_type())
    } else {
        result
    })
}

/// Unwrap any wrapper-shaped values inside an argument tree.
fn sanitize_value(value: &Value) -> Value {
    if let Ok(wrapped) = serde_json::from_value::<AgentValue>(value.clone()) {
        if !matches!(wrapped, AgentValue::Json(_)) {
            return wrapped.unwrap_raw();
        }
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Re-wrap a tool result according to its declared output type.
fn rewrap_output(result: AgentValue, output_type: ParamType) -> AgentValue {
    match (output_type, result) {
        (ParamType::String, AgentValue::Json(Value::String(s))) => AgentValue::text(s),
        (ParamType::Image, AgentValue::Json(Value::String(s))) => {
            crate::multimodal::AgentImage::from_base64(&s)
                .map(AgentValue::Image)
                .unwrap_or_else(|_| AgentValue::Json(Value::String(s)))
        }
        (ParamType::Audio, AgentValue::Json(Value::String(s))) => {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD
                .decode(s.as_bytes())
                .map(AgentValue::audio)
                .unwrap_or_else(|_| AgentValue::Json(Value::String(s)))
        }
        (_, result) => result,
    }
}

struct ToolEntry {
    tool: SharedTool,
    setup_done: AtomicBool,
}

/// Name-keyed registry of tools with duplicate detection.
#[derive(Default)]
pub struct ToolBox {
    entries: Vec<ToolEntry>,
}

impl ToolBox {
    /// Create an empty toolbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Rejects invalid identifiers, reserved names, and duplicates.
    pub fn add(&mut self, tool: SharedTool) -> Result<(), ToolError> {
        let name = tool.name().to_owned();
        Self::check_name(&name)?;
        if self.contains(&name) {
            return Err(ToolError::invalid_args(format!(
                "a tool named '{name}' is already registered"
            )));
        }
        self.entries.push(ToolEntry {
            tool,
            setup_done: AtomicBool::new(false),
        });
        Ok(())
    }

    fn check_name(name: &str) -> Result<(), ToolError> {
        let valid_identifier = !name.is_empty()
            && name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_identifier {
            return Err(ToolError::invalid_args(format!(
                "tool name '{name}' is not a valid identifier"
            )));
        }
        if RESERVED_TOOL_NAMES.contains(&name) {
            return Err(ToolError::invalid_args(format!(
                "tool name '{name}' is reserved"
            )));
        }
        Ok(())
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.tool.name() == name)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.entries
            .iter()
            .find(|e| e.tool.name() == name)
            .map(|e| &e.tool)
    }

    /// Registered tool names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the toolbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions for the structured tool-call channel.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.tool.definition()).collect()
    }

    /// Call signatures for the code agent's prompt, one per tool.
    #[must_use]
    pub fn code_signatures(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.tool.to_code_signature())
            .collect()
    }

    /// Iterate over registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &SharedTool> {
        self.entries.iter().map(|e| &e.tool)
    }

    /// Invoke a tool by name: one-time setup, validation, sanitization,
    /// then `forward`.
    ///
    /// # Errors
    ///
    /// [`ToolError::NotFound`] for unknown names; setup, validation, and
    /// execution errors from the tool itself.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Value,
        sanitize_io: bool,
    ) -> Result<AgentValue, ToolError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.tool.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;

        if !entry.setup_done.load(Ordering::Acquire) {
            debug!(tool = name, "running one-time tool setup");
            entry
                .tool
                .setup()
                .await
                .map_err(|e| ToolError::Setup(e.to_string()))?;
            entry.setup_done.store(true, Ordering::Release);
        }

        invoke_tool(entry.tool.as_ref(), arguments, sanitize_io).await
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox").field("tools", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

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

        fn output_type(&self) -> ParamType {
            ParamType::Number
        }

        async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            Ok(AgentValue::Json(json!(a + b)))
        }
    }

    struct CountingSetupTool {
        setups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingSetupTool {
        fn name(&self) -> &str {
            "counting"
        }

        fn description(&self) -> &str {
            "Counts setups."
        }

        fn inputs(&self) -> &ToolInputs {
            static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
            INPUTS.get_or_init(ToolInputs::new)
        }

        async fn setup(&self) -> Result<(), ToolError> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn forward(&self, _args: Map<String, Value>) -> Result<AgentValue, ToolError> {
            Ok(AgentValue::text("ok"))
        }
    }

    #[tokio::test]
    async fn test_toolbox_call_validates_and_executes() {
        let mut toolbox = ToolBox::new();
        toolbox.add(Arc::new(AddTool)).unwrap();

        let result = toolbox
            .call("add", &json!({"a": 1, "b": 2}), true)
            .await
            .unwrap();
        assert_eq!(result.as_json(), Some(json!(3.0)));

        let err = toolbox
            .call("add", &json!({"a": "x", "b": 2}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_validation_agrees_with_call_rejection() {
        let tool = AddTool;
        for args in [
            json!({"a": 1, "b": 2}),
            json!({"a": "x", "b": 2}),
            json!({"a": 1}),
            json!({"a": 1, "b": 2, "c": 3}),
        ] {
            let validated = validate_arguments(tool.inputs(), &args).is_ok();
            let called = invoke_tool(&tool, &args, true).await.is_ok();
            assert_eq!(validated, called, "disagreement for {args}");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let toolbox = ToolBox::new();
        let err = toolbox.call("nope", &json!({}), true).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_setup_runs_once() {
        let setups = Arc::new(AtomicUsize::new(0));
        let mut toolbox = ToolBox::new();
        toolbox
            .add(Arc::new(CountingSetupTool {
                setups: Arc::clone(&setups),
            }))
            .unwrap();

        toolbox.call("counting", &json!({}), true).await.unwrap();
        toolbox.call("counting", &json!({}), true).await.unwrap();
        assert_eq!(setups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_and_reserved_names_rejected() {
        let mut toolbox = ToolBox::new();
        toolbox.add(Arc::new(AddTool)).unwrap();
        assert!(toolbox.add(Arc::new(AddTool)).is_err());

        struct BadName;
        #[async_trait]
        impl Tool for BadName {
            fn name(&self) -> &str {
                "print"
            }
            fn description(&self) -> &str {
                "shadowing"
            }
            fn inputs(&self) -> &ToolInputs {
                static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
                INPUTS.get_or_init(ToolInputs::new)
            }
            async fn forward(&self, _: Map<String, Value>) -> Result<AgentValue, ToolError> {
                Ok(AgentValue::text(""))
            }
        }
        assert!(toolbox.add(Arc::new(BadName)).is_err());
    }

    #[tokio::test]
    async fn test_sanitize_unwraps_wrapper_arguments() {
        struct EchoTool;
        #[async_trait]
        impl Tool for EchoTool {
            fn name(&self) -> &str {
                "echo"
            }
            fn description(&self) -> &str {
                "Echo a string."
            }
            fn inputs(&self) -> &ToolInputs {
                static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
                INPUTS.get_or_init(|| ToolInputs::new().param("text", ToolParam::string("input")))
            }
            async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
                Ok(AgentValue::Json(args["text"].clone()))
            }
        }

        let wrapped = serde_json::to_value(AgentValue::text("wrapped")).unwrap();
        let result = invoke_tool(&EchoTool, &json!({ "text": wrapped }), true)
            .await
            .unwrap();
        // Unwrapped on input, re-wrapped as text on output.
        assert_eq!(result, AgentValue::text("wrapped"));
    }

    #[test]
    fn test_openai_schema_via_trait() {
        let schema = AddTool.to_json_schema();
        assert_eq!(schema["function"]["name"], "add");
        assert_eq!(
            schema["function"]["parameters"]["required"],
            json!(["a", "b"])
        );
    }
}
