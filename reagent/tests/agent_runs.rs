//! End-to-end agent runs against a scripted model.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use reagent::agent::{Agent, RunState};
use reagent::error::{AgentError, ErrorKind};
use reagent::memory::MemoryStep;
use reagent::message::{
    ChatMessage, ChatMessageStreamDelta, ChatMessageToolCall, FunctionStreamDelta,
    ToolCallStreamDelta,
};
use reagent::models::{GenerateOptions, Model, ModelResponse, ModelStream};
use reagent::monitor::TokenUsage;
use reagent::multimodal::AgentValue;
use reagent::tool::{Tool, ToolError, ToolInputs, ToolParam};

/// One scripted model turn.
enum Turn {
    Message(ChatMessage),
    Deltas(Vec<ChatMessageStreamDelta>),
}

/// A model that replays a fixed script of turns.
struct ScriptedModel {
    turns: Mutex<VecDeque<Turn>>,
    streaming: bool,
}

impl ScriptedModel {
    fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            streaming: false,
        }
    }

    fn streaming(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            streaming: true,
        }
    }

    fn next_turn(&self) -> Turn {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted")
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _messages: Vec<ChatMessage>,
        _options: GenerateOptions,
    ) -> reagent::Result<ModelResponse> {
        match self.next_turn() {
            Turn::Message(message) => {
                let usage = message.token_usage;
                let mut response = ModelResponse::new(message);
                if let Some(usage) = usage {
                    response = response.with_token_usage(usage);
                }
                Ok(response)
            }
            Turn::Deltas(deltas) => {
                let message = reagent::message::aggregate_stream_deltas(&deltas);
                let usage = message.token_usage;
                let mut response = ModelResponse::new(message);
                if let Some(usage) = usage {
                    response = response.with_token_usage(usage);
                }
                Ok(response)
            }
        }
    }

    async fn generate_stream(
        &self,
        _messages: Vec<ChatMessage>,
        _options: GenerateOptions,
    ) -> reagent::Result<ModelStream> {
        match self.next_turn() {
            Turn::Deltas(deltas) => Ok(Box::pin(futures::stream::iter(
                deltas.into_iter().map(Ok),
            ))),
            Turn::Message(message) => {
                let delta = ChatMessageStreamDelta {
                    content: message.text_content(),
                    tool_calls: None,
                    token_usage: message.token_usage,
                };
                Ok(Box::pin(futures::stream::once(async move { Ok(delta) })))
            }
        }
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

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
    fn output_type(&self) -> reagent::tool::ParamType {
        reagent::tool::ParamType::Number
    }
    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        let a = args["a"].as_f64().unwrap_or_default();
        let b = args["b"].as_f64().unwrap_or_default();
        Ok(AgentValue::Json(json!(a + b)))
    }
}

fn assistant_with_usage(text: &str) -> ChatMessage {
    ChatMessage::assistant(text).with_token_usage(TokenUsage::new(10, 5))
}

fn tool_call_message(id: &str, name: &str, arguments: Value) -> ChatMessage {
    ChatMessage::assistant("")
        .with_tool_calls(vec![ChatMessageToolCall::new(id, name, arguments)])
        .with_token_usage(TokenUsage::new(10, 5))
}

#[tokio::test]
async fn code_agent_finishes_in_one_step() {
    let model = ScriptedModel::new(vec![Turn::Message(assistant_with_usage(
        "Thought: simple arithmetic.\n<code>\nfinal_answer(2+2)\n</code>",
    ))]);

    let mut agent = Agent::code().model(Box::new(model)).build().unwrap();

    let result = agent.run_detailed("Compute 2+2 and finalize.").await;
    assert_eq!(result.state, RunState::Success);
    assert_eq!(result.output, Some(json!(4)));
    assert_eq!(result.steps_taken, 1);

    let action_steps: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(action_steps.len(), 1);
    assert!(action_steps[0].is_final_answer);
    assert_eq!(action_steps[0].action_output, Some(json!(4)));
    assert_eq!(
        action_steps[0].code_action.as_deref(),
        Some("final_answer(2+2)")
    );
}

#[tokio::test]
async fn tool_validation_failure_recovers() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message("c1", "add", json!({"a": "x", "b": 2}))),
        Turn::Message(tool_call_message("c2", "add", json!({"a": 1, "b": 2}))),
        Turn::Message(tool_call_message("c3", "final_answer", json!({"answer": 3}))),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .tool(Arc::new(AddTool))
        .build()
        .unwrap();

    let result = agent.run_detailed("Add 1 and 2.").await;
    assert_eq!(result.state, RunState::Success);
    assert_eq!(result.output, Some(json!(3)));

    // The failed call was recorded on step 1 without killing the run, and
    // the retry prompt surfaced it to the model.
    let steps: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(steps.len(), 3);
    let first_error = steps[0].error.as_ref().expect("error recorded");
    assert_eq!(first_error.kind, ErrorKind::ToolCall);
    assert!(steps[1].error.is_none());
    assert!(steps[1].observations.as_ref().unwrap().contains('3'));

    let retry_prompt = steps[0]
        .to_owned();
    let projected = MemoryStep::Action(retry_prompt).to_messages(false);
    assert!(projected
        .iter()
        .any(|m| m.text_content().unwrap_or_default().contains("Now let's retry")));
}

#[tokio::test]
async fn streamed_split_tool_call_final_answer() {
    // The final_answer call arrives split across three deltas.
    let deltas = vec![
        ChatMessageStreamDelta {
            content: Some("Answer".to_owned()),
            ..Default::default()
        },
        ChatMessageStreamDelta {
            tool_calls: Some(vec![ToolCallStreamDelta {
                index: Some(0),
                id: Some("c1".to_owned()),
                call_type: Some("function".to_owned()),
                function: Some(FunctionStreamDelta {
                    name: Some("fi".to_owned()),
                    arguments: Some(String::new()),
                }),
            }]),
            ..Default::default()
        },
        ChatMessageStreamDelta {
            tool_calls: Some(vec![ToolCallStreamDelta {
                index: Some(0),
                function: Some(FunctionStreamDelta {
                    name: Some("nal_answer".to_owned()),
                    arguments: Some("{\"answer\":".to_owned()),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ChatMessageStreamDelta {
            tool_calls: Some(vec![ToolCallStreamDelta {
                index: Some(0),
                function: Some(FunctionStreamDelta {
                    name: Some(String::new()),
                    arguments: Some("42}".to_owned()),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ChatMessageStreamDelta {
            token_usage: Some(TokenUsage::new(10, 5)),
            ..Default::default()
        },
    ];

    let model = ScriptedModel::streaming(vec![Turn::Deltas(deltas)]);
    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .build()
        .unwrap();

    let result = agent.run_detailed("Answer 42.").await;
    assert_eq!(result.state, RunState::Success);
    assert_eq!(result.output, Some(json!(42)));
    assert_eq!(result.token_usage, Some(TokenUsage::new(10, 5)));
}

#[tokio::test]
async fn max_steps_appends_synthesized_step() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message("c1", "add", json!({"a": 1, "b": 2}))),
        Turn::Message(tool_call_message("c2", "add", json!({"a": 2, "b": 3}))),
        // The synthesis call.
        Turn::Message(assistant_with_usage("Best effort: the sum so far is 5.")),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .tool(Arc::new(AddTool))
        .max_steps(2)
        .build()
        .unwrap();

    let result = agent.run_detailed("Keep adding forever.").await;
    assert_eq!(result.state, RunState::MaxStepsReached);
    assert_eq!(
        result.output,
        Some(json!("Best effort: the sum so far is 5."))
    );

    let steps: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(steps.len(), 3);
    assert!(steps[0].error.is_none());
    assert!(steps[1].error.is_none());
    let synthesized = steps[2];
    assert_eq!(
        synthesized.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::MaxSteps)
    );

    // Step numbers are strictly increasing from 1.
    let numbers = agent.memory().action_step_numbers();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn interrupt_mid_run_is_fatal() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message("c1", "add", json!({"a": 1, "b": 2}))),
        // Never reached: the interrupt fires before step 2.
        Turn::Message(tool_call_message("c2", "add", json!({"a": 2, "b": 3}))),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .tool(Arc::new(AddTool))
        .build()
        .unwrap();

    let handle = agent.interrupt_handle();
    agent.callbacks_mut().register_any(move |step, _ctx| {
        if matches!(step, MemoryStep::Action(_)) {
            handle.store(true, Ordering::SeqCst);
        }
    });

    let err = agent.run("Run forever.").await.unwrap_err();
    assert!(matches!(err, AgentError::Interrupted));
    assert_eq!(err.to_string(), "Agent interrupted");
}

#[tokio::test]
async fn token_usage_aggregates_across_steps() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message("c1", "add", json!({"a": 1, "b": 2}))),
        Turn::Message(tool_call_message("c2", "final_answer", json!({"answer": 3}))),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .tool(Arc::new(AddTool))
        .build()
        .unwrap();

    let result = agent.run_detailed("Add 1 and 2.").await;
    assert_eq!(result.state, RunState::Success);
    // Two action steps at (10, 5) each.
    assert_eq!(result.token_usage, Some(TokenUsage::new(20, 10)));
    assert_eq!(
        result.token_usage,
        agent.memory().total_token_usage()
    );
}

#[tokio::test]
async fn planning_step_inserted_at_cadence() {
    let model = ScriptedModel::new(vec![
        // Planning call for step 1.
        Turn::Message(assistant_with_usage("1. Add the numbers.\n<end_plan>")),
        Turn::Message(tool_call_message("c1", "final_answer", json!({"answer": 3}))),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .tool(Arc::new(AddTool))
        .planning_interval(3)
        .build()
        .unwrap();

    let result = agent.run_detailed("Add 1 and 2.").await;
    assert_eq!(result.state, RunState::Success);

    let plans: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Planning(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].plan, "1. Add the numbers.");
}

#[tokio::test]
async fn code_agent_recovers_from_execution_error() {
    let model = ScriptedModel::new(vec![
        Turn::Message(assistant_with_usage(
            "<code>\nundefined_variable + 1\n</code>",
        )),
        Turn::Message(assistant_with_usage("<code>\nfinal_answer(7)\n</code>")),
    ]);

    let mut agent = Agent::code().model(Box::new(model)).build().unwrap();

    let result = agent.run_detailed("Compute something.").await;
    assert_eq!(result.state, RunState::Success);
    assert_eq!(result.output, Some(json!(7)));

    let steps: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(steps[0].error.as_ref().map(|e| e.kind), Some(ErrorKind::Execution));
}

#[tokio::test]
async fn final_answer_check_rejection_keeps_running() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message(
            "c1",
            "final_answer",
            json!({"answer": "wrong"}),
        )),
        Turn::Message(tool_call_message("c2", "final_answer", json!({"answer": 42}))),
    ]);

    let mut agent = Agent::tool_calling()
        .model(Box::new(model))
        .final_answer_check(|answer, _memory| {
            if answer.is_number() {
                Ok(())
            } else {
                Err(AgentError::execution("answer must be a number"))
            }
        })
        .build()
        .unwrap();

    let result = agent.run_detailed("Give a number.").await;
    assert_eq!(result.state, RunState::Success);
    assert_eq!(result.output, Some(json!(42)));
    assert_eq!(result.steps_taken, 2);
}

#[tokio::test]
async fn second_final_answer_in_one_memory_is_fatal() {
    let model = ScriptedModel::new(vec![
        Turn::Message(tool_call_message("c1", "final_answer", json!({"answer": 1}))),
        Turn::Message(tool_call_message("c2", "final_answer", json!({"answer": 2}))),
    ]);

    let mut agent = Agent::tool_calling().model(Box::new(model)).build().unwrap();

    let first = agent.run_detailed("Answer once.").await;
    assert_eq!(first.state, RunState::Success);
    assert_eq!(first.output, Some(json!(1)));

    // Continue on the same memory: the second accepted answer must be
    // fatal, not recorded.
    let options = reagent::agent::RunOptions {
        keep_memory: true,
        ..Default::default()
    };
    let second = agent.run_detailed_with("Answer again.", options).await;
    assert_eq!(second.state, RunState::Failed);
    assert!(second
        .error
        .as_ref()
        .unwrap()
        .contains("already records a final answer"));

    // The memory invariant held: exactly one step carries the answer.
    let answered: Vec<_> = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) if a.is_final_answer => Some(a.step_number),
            _ => None,
        })
        .collect();
    assert_eq!(answered, vec![1]);
    let rejected = agent
        .memory()
        .steps
        .iter()
        .filter_map(|s| match s {
            MemoryStep::Action(a) if a.step_number == 2 => Some(a),
            _ => None,
        })
        .next()
        .expect("second step recorded");
    assert_eq!(
        rejected.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Execution)
    );
}

#[tokio::test]
async fn additional_args_are_injected() {
    let model = ScriptedModel::new(vec![Turn::Message(assistant_with_usage(
        "<code>\nfinal_answer(payload)\n</code>",
    ))]);

    let mut agent = Agent::code().model(Box::new(model)).build().unwrap();

    let mut additional = std::collections::HashMap::new();
    additional.insert("payload".to_owned(), json!("from state"));
    let options = reagent::agent::RunOptions {
        additional_args: additional,
        ..Default::default()
    };

    let result = agent.run_with("Return the payload.", options).await.unwrap();
    assert_eq!(result, json!("from state"));

    // The task prose mentions the additional arguments.
    let task_text = agent
        .memory()
        .steps
        .iter()
        .find_map(|s| match s {
            MemoryStep::Task(t) => Some(t.task.clone()),
            _ => None,
        })
        .unwrap();
    assert!(task_text.contains("additional arguments"));
}
