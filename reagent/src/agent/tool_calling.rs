//! Per-step tool-call processing for the tool-calling strategy.
//!
//! Calls are read from the model's structured channel (with a textual JSON
//! fallback), validated, dispatched to tools or managed sub-agents (fanned
//! out across a bounded pool when configured), and folded back into the
//! action step in call order.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AgentError, Result, StepError};
use crate::managed::ManagedAgentRegistry;
use crate::memory::{ActionStep, ToolCall};
use crate::message::{ChatMessage, ChatMessageToolCall};
use crate::multimodal::AgentValue;
use crate::tool::{ToolBox, FINAL_ANSWER_TOOL};

use super::events::{StepResult, StreamEvent};

/// Read tool calls from a model message.
///
/// Prefers the structured channel; falls back to parsing the content text
/// as a JSON object `{name, arguments}`.
///
/// # Errors
///
/// [`AgentError::Parsing`] when neither channel yields a call.
pub(super) fn extract_tool_calls(message: &ChatMessage) -> Result<Vec<ChatMessageToolCall>> {
    if let Some(calls) = &message.tool_calls {
        if !calls.is_empty() {
            return Ok(calls.clone());
        }
    }

    let text = message.text_content().unwrap_or_default();
    if let Some(call) = parse_text_tool_call(&text) {
        debug!(tool = %call.name(), "parsed tool call from text fallback");
        return Ok(vec![call]);
    }

    let preview: String = text.chars().take(200).collect();
    Err(AgentError::parsing(format!(
        "model output contains no tool call. Write a JSON object like \
         {{\"name\": \"tool_name\", \"arguments\": {{...}}}} or use the structured tool-call \
         channel. Output was: {preview}"
    )))
}

/// Parse the textual fallback protocol: the first balanced JSON object in
/// the content carrying `name` (and optionally `arguments`).
fn parse_text_tool_call(text: &str) -> Option<ChatMessageToolCall> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let json: Value = serde_json::from_str(&text[start..end?]).ok()?;
    let name = json.get("name")?.as_str()?.to_owned();
    let arguments = json
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    Some(ChatMessageToolCall::new(
        format!("text_{}", uuid::Uuid::new_v4().simple()),
        name,
        arguments,
    ))
}

/// Outcome of a single dispatched call, before merging.
enum CallOutcome {
    Value(AgentValue),
    Report(String),
    Failed(AgentError),
}

/// Process one step's tool calls.
///
/// Observed events are appended to `events` in execution order so streaming
/// callers can replay them.
pub(super) async fn process_tool_calls(
    calls: Vec<ChatMessageToolCall>,
    step: &mut ActionStep,
    tools: &ToolBox,
    managed_agents: &ManagedAgentRegistry,
    state: &mut HashMap<String, Value>,
    max_tool_threads: usize,
    events: &mut Vec<StreamEvent>,
) -> Result<StepResult> {
    // Parse string-form arguments once, up front; record every call in
    // memory order regardless of how execution goes.
    let mut parsed: Vec<(ChatMessageToolCall, Value)> = Vec::with_capacity(calls.len());
    for call in calls {
        let arguments = call
            .parsed_arguments()
            .map_err(|e| AgentError::tool_call(format!(
                "arguments for tool '{}' are not valid JSON: {e}",
                call.name()
            )))?;
        step.tool_calls
            .get_or_insert_with(Vec::new)
            .push(ToolCall::new(&call.id, call.name(), arguments.clone()));
        events.push(StreamEvent::ToolCallStart {
            id: call.id.clone(),
            name: call.name().to_owned(),
        });
        parsed.push((call, arguments));
    }

    let has_final_answer = parsed
        .iter()
        .any(|(call, _)| call.name() == FINAL_ANSWER_TOOL);

    if has_final_answer {
        if parsed.len() > 1 {
            return Err(AgentError::execution(
                "the model emitted other tool calls alongside final_answer in the same step; \
                 final_answer must be the only call",
            ));
        }
        let (call, arguments) = &parsed[0];
        let answer = extract_final_answer(arguments);
        events.push(StreamEvent::ToolCallComplete {
            id: call.id.clone(),
            name: FINAL_ANSWER_TOOL.to_owned(),
            result: Ok("Final answer recorded".to_owned()),
        });
        step.is_final_answer = true;
        step.action_output = Some(answer.clone());
        return Ok(StepResult::FinalAnswer(answer));
    }

    // Fan out across a bounded pool; results merge back in call order.
    let concurrency = max_tool_threads.max(1);
    let mut outcomes: Vec<CallOutcome> = Vec::with_capacity(parsed.len());
    for chunk in parsed.chunks(concurrency) {
        let futures: Vec<_> = chunk
            .iter()
            .map(|(call, arguments)| dispatch_call(call, arguments, tools, managed_agents))
            .collect();
        outcomes.extend(futures::future::join_all(futures).await);
    }

    // State writes happen between joins, on the driver thread only.
    let mut observations = Vec::with_capacity(outcomes.len());
    for ((call, _), outcome) in parsed.iter().zip(outcomes) {
        let name = call.name().to_owned();
        match outcome {
            CallOutcome::Value(value) => {
                let rendered = render_observation(&name, value, step, state);
                events.push(StreamEvent::ToolCallComplete {
                    id: call.id.clone(),
                    name,
                    result: Ok(rendered.clone()),
                });
                observations.push(rendered);
            }
            CallOutcome::Report(report) => {
                events.push(StreamEvent::ToolCallComplete {
                    id: call.id.clone(),
                    name,
                    result: Ok(report.clone()),
                });
                observations.push(report);
            }
            CallOutcome::Failed(error) => {
                warn!(tool = %name, error = %error, "tool call failed");
                let rendered = error.to_string();
                if step.error.is_none() {
                    step.error = Some(StepError::from(&error));
                }
                events.push(StreamEvent::ToolCallComplete {
                    id: call.id.clone(),
                    name,
                    result: Err(rendered.clone()),
                });
                observations.push(rendered);
            }
        }
    }

    if !observations.is_empty() {
        step.observations = Some(observations.join("\n"));
    }
    Ok(StepResult::Continue)
}

async fn dispatch_call(
    call: &ChatMessageToolCall,
    arguments: &Value,
    tools: &ToolBox,
    managed_agents: &ManagedAgentRegistry,
) -> CallOutcome {
    let name = call.name();

    if tools.contains(name) {
        return match tools.call(name, arguments, true).await {
            Ok(value) => CallOutcome::Value(value),
            Err(e) => CallOutcome::Failed(e.into()),
        };
    }

    if let Some(agent) = managed_agents.get(name) {
        let task = arguments
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return match agent.call(task, None).await {
            Ok(report) => CallOutcome::Report(report),
            Err(e) => CallOutcome::Failed(AgentError::tool_execution(format!(
                "managed agent '{name}' failed: {e}"
            ))),
        };
    }

    CallOutcome::Failed(AgentError::tool_call(format!(
        "unknown tool '{name}'; available tools are: {}",
        tools
            .names()
            .into_iter()
            .chain(managed_agents.names())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// The final answer is the `answer` field when the arguments are an object
/// carrying one, otherwise the arguments themselves.
fn extract_final_answer(arguments: &Value) -> Value {
    arguments
        .get("answer")
        .cloned()
        .unwrap_or_else(|| arguments.clone())
}

/// Fold a tool result into the observation string. Media values land in
/// agent state under a generated key; the observation names the key instead
/// of embedding the bytes.
fn render_observation(
    tool_name: &str,
    value: AgentValue,
    step: &mut ActionStep,
    state: &mut HashMap<String, Value>,
) -> String {
    match &value {
        AgentValue::Image(image) => {
            step.observation_images.push(image.clone());
            let key = next_media_key(state, "image", "png");
            let stored = serde_json::to_value(&value).unwrap_or(Value::Null);
            state.insert(key.clone(), stored);
            format!("Stored '{key}' in memory.")
        }
        AgentValue::Audio(_) => {
            let key = next_media_key(state, "audio", "mp3");
            let stored = serde_json::to_value(&value).unwrap_or(Value::Null);
            state.insert(key.clone(), stored);
            format!("Stored '{key}' in memory.")
        }
        other => format!("Tool '{tool_name}' returned: {}", other.to_display_string()),
    }
}

fn next_media_key(state: &HashMap<String, Value>, stem: &str, ext: &str) -> String {
    let base = format!("{stem}.{ext}");
    if !state.contains_key(&base) {
        return base;
    }
    let mut counter = 2;
    loop {
        let key = format!("{stem}_{counter}.{ext}");
        if !state.contains_key(&key) {
            return key;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRole;
    use crate::tool::{Tool, ToolError, ToolInputs, ToolParam};
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
            args: serde_json::Map<String, Value>,
        ) -> std::result::Result<AgentValue, ToolError> {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            Ok(AgentValue::Json(json!(a + b)))
        }
    }

    struct PictureTool;

    #[async_trait]
    impl Tool for PictureTool {
        fn name(&self) -> &str {
            "picture"
        }
        fn description(&self) -> &str {
            "Produce a picture."
        }
        fn inputs(&self) -> &ToolInputs {
            static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
            INPUTS.get_or_init(ToolInputs::new)
        }
        fn output_type(&self) -> crate::tool::ParamType {
            crate::tool::ParamType::Image
        }
        async fn forward(
            &self,
            _args: serde_json::Map<String, Value>,
        ) -> std::result::Result<AgentValue, ToolError> {
            Ok(AgentValue::image(vec![1, 2, 3]))
        }
    }

    fn toolbox() -> ToolBox {
        let mut tools = ToolBox::new();
        tools.add(Arc::new(AddTool)).unwrap();
        tools.add(Arc::new(PictureTool)).unwrap();
        tools
    }

    #[test]
    fn test_extract_native_calls_win() {
        let message = ChatMessage::assistant("irrelevant").with_tool_calls(vec![
            ChatMessageToolCall::new("c1", "add", json!({"a": 1, "b": 2})),
        ]);
        let calls = extract_tool_calls(&message).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "add");
    }

    #[test]
    fn test_extract_textual_fallback() {
        let message = ChatMessage::assistant(
            "I will call the tool now: {\"name\": \"add\", \"arguments\": {\"a\": 1, \"b\": 2}}",
        );
        let calls = extract_tool_calls(&message).unwrap();
        assert_eq!(calls[0].name(), "add");
        assert_eq!(calls[0].function.arguments["a"], json!(1));
    }

    #[test]
    fn test_extract_failure_is_parsing_error() {
        let message = ChatMessage::assistant("I have no idea what to do.");
        let err = extract_tool_calls(&message).unwrap_err();
        assert!(matches!(err, AgentError::Parsing(_)));
        assert_eq!(message.role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_process_executes_and_records() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![ChatMessageToolCall::new("c1", "add", json!({"a": 1, "b": 2}))];
        let result = process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
        )
        .await
        .unwrap();

        assert!(matches!(result, StepResult::Continue));
        assert_eq!(step.tool_calls.as_ref().unwrap().len(), 1);
        assert!(step.observations.as_ref().unwrap().contains("3"));
        assert!(step.error.is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_recorded_not_fatal() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![ChatMessageToolCall::new(
            "c1",
            "add",
            json!({"a": "x", "b": 2}),
        )];
        let result = process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
        )
        .await
        .unwrap();

        assert!(matches!(result, StepResult::Continue));
        let error = step.error.expect("error recorded");
        assert_eq!(error.kind, crate::error::ErrorKind::ToolCall);
    }

    #[tokio::test]
    async fn test_final_answer_terminates_step() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![ChatMessageToolCall::new(
            "c1",
            "final_answer",
            json!({"answer": 42}),
        )];
        let result = process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
        )
        .await
        .unwrap();

        match result {
            StepResult::FinalAnswer(answer) => assert_eq!(answer, json!(42)),
            StepResult::Continue => panic!("expected final answer"),
        }
        assert!(step.is_final_answer);
    }

    #[tokio::test]
    async fn test_final_answer_with_siblings_is_fatal() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![
            ChatMessageToolCall::new("c1", "add", json!({"a": 1, "b": 2})),
            ChatMessageToolCall::new("c2", "final_answer", json!({"answer": 3})),
        ];
        let err = process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Execution(_)));
    }

    #[tokio::test]
    async fn test_media_result_stored_under_key() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        for id in ["c1", "c2"] {
            let calls = vec![ChatMessageToolCall::new(id, "picture", json!({}))];
            process_tool_calls(
                calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
            )
            .await
            .unwrap();
        }

        assert!(state.contains_key("image.png"));
        assert!(state.contains_key("image_2.png"));
        let observations = step.observations.unwrap();
        assert!(observations.contains("Stored 'image.png' in memory."));
        assert!(!observations.contains("AgentImage"));
        assert_eq!(step.observation_images.len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_results_merge_in_call_order() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![
            ChatMessageToolCall::new("c1", "add", json!({"a": 1, "b": 1})),
            ChatMessageToolCall::new("c2", "add", json!({"a": 2, "b": 2})),
            ChatMessageToolCall::new("c3", "add", json!({"a": 3, "b": 3})),
        ];
        process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 4, &mut events,
        )
        .await
        .unwrap();

        let observations = step.observations.unwrap();
        let lines: Vec<&str> = observations.lines().collect();
        assert!(lines[0].contains('2'));
        assert!(lines[1].contains('4'));
        assert!(lines[2].contains('6'));
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_alternatives() {
        let tools = toolbox();
        let managed = ManagedAgentRegistry::new();
        let mut state = HashMap::new();
        let mut step = ActionStep::default();
        let mut events = Vec::new();

        let calls = vec![ChatMessageToolCall::new("c1", "subtract", json!({}))];
        process_tool_calls(
            calls, &mut step, &tools, &managed, &mut state, 1, &mut events,
        )
        .await
        .unwrap();

        let observations = step.observations.unwrap();
        assert!(observations.contains("unknown tool 'subtract'"));
        assert!(observations.contains("add"));
    }
}
