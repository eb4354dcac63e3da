//! Chat-completions model over an OpenAI-compatible endpoint.

use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::message::{
    ChatMessage, ChatMessageStreamDelta, ChatMessageToolCall, ContentPart, FunctionStreamDelta,
    MessageContent, MessageRole, ToolCallStreamDelta,
};
use crate::models::common::{
    model_requires_max_completion_tokens, truncate_at_stop, GenerateOptions, Model, ModelResponse,
    ModelStream, RetryConfig, with_rate_limit_retries,
};
use crate::models::streaming::sse_payloads;
use crate::monitor::TokenUsage;

use super::client::OpenAIClient;

/// A model bound to one model ID on an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct CompletionModel {
    client: OpenAIClient,
    model_id: String,
    retry: RetryConfig,
}

impl CompletionModel {
    /// Create a completion model.
    pub fn new(client: OpenAIClient, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry configuration.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        stream: bool,
    ) -> Value {
        let mut body = Map::new();
        body.insert("model".to_owned(), json!(self.model_id));
        body.insert(
            "messages".to_owned(),
            Value::Array(messages.iter().map(wire_message).collect()),
        );

        if self.supports_stop_parameter() {
            if let Some(stops) = &options.stop_sequences {
                if !stops.is_empty() {
                    body.insert("stop".to_owned(), json!(stops));
                }
            }
        }
        if let Some(tools) = &options.tools {
            if !tools.is_empty() {
                body.insert(
                    "tools".to_owned(),
                    Value::Array(tools.iter().map(|t| t.to_openai_schema()).collect()),
                );
                if let Some(choice) = options.tool_choice {
                    body.insert("tool_choice".to_owned(), json!(choice.as_openai_str()));
                }
            }
        }
        if let Some(temperature) = options.temperature {
            body.insert("temperature".to_owned(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            let key = if model_requires_max_completion_tokens(&self.model_id) {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body.insert(key.to_owned(), json!(max_tokens));
        }
        if let Some(top_p) = options.top_p {
            body.insert("top_p".to_owned(), json!(top_p));
        }
        if let Some(format) = &options.response_format {
            body.insert("response_format".to_owned(), format.clone());
        }
        if stream {
            body.insert("stream".to_owned(), json!(true));
            body.insert("stream_options".to_owned(), json!({"include_usage": true}));
        }

        Value::Object(body)
    }

    async fn post(&self, body: &Value, stream: bool) -> Result<reqwest::Response> {
        debug!(model = %self.model_id, stream, "sending chat completion request");

        let response = self
            .client
            .post_json("chat/completions")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::generation(format!(
                "API error (HTTP {status}): {text}"
            )));
        }
        Ok(response)
    }
}

fn wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User | MessageRole::ToolResponse => "user",
        MessageRole::Assistant | MessageRole::ToolCall => "assistant",
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = Map::new();
    wire.insert("role".to_owned(), json!(wire_role(message.role)));

    match &message.content {
        Some(MessageContent::Text(text)) => {
            wire.insert("content".to_owned(), json!(text));
        }
        Some(MessageContent::Parts(parts)) => {
            let rendered: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { image } => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/png;base64,{image}")}
                    }),
                })
                .collect();
            wire.insert("content".to_owned(), Value::Array(rendered));
        }
        None => {
            wire.insert("content".to_owned(), Value::Null);
        }
    }

    Value::Object(wire)
}

fn parse_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    let input = usage.get("prompt_tokens")?.as_u64()? as u32;
    let output = usage.get("completion_tokens")?.as_u64()? as u32;
    Some(TokenUsage::new(input, output))
}

fn parse_tool_calls(message: &Value) -> Option<Vec<ChatMessageToolCall>> {
    let calls = message.get("tool_calls")?.as_array()?;
    let parsed: Vec<ChatMessageToolCall> = calls
        .iter()
        .filter_map(|call| {
            let id = call.get("id")?.as_str()?.to_owned();
            let function = call.get("function")?;
            let name = function.get("name")?.as_str()?.to_owned();
            let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
            Some(ChatMessageToolCall::new(id, name, arguments))
        })
        .collect();
    (!parsed.is_empty()).then_some(parsed)
}

fn parse_stream_chunk(data: &str) -> Result<Option<ChatMessageStreamDelta>> {
    let chunk: Value = serde_json::from_str(data)
        .map_err(|e| AgentError::generation(format!("malformed stream chunk: {e}")))?;

    let mut delta = ChatMessageStreamDelta {
        token_usage: parse_usage(&chunk),
        ..Default::default()
    };

    if let Some(choice_delta) = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
    {
        delta.content = choice_delta
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if let Some(calls) = choice_delta.get("tool_calls").and_then(Value::as_array) {
            let fragments: Vec<ToolCallStreamDelta> = calls
                .iter()
                .map(|call| ToolCallStreamDelta {
                    index: call.get("index").and_then(Value::as_u64).map(|i| i as usize),
                    id: call.get("id").and_then(Value::as_str).map(str::to_owned),
                    call_type: call.get("type").and_then(Value::as_str).map(str::to_owned),
                    function: call.get("function").map(|f| FunctionStreamDelta {
                        name: f.get("name").and_then(Value::as_str).map(str::to_owned),
                        arguments: f
                            .get("arguments")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                    }),
                })
                .collect();
            if !fragments.is_empty() {
                delta.tool_calls = Some(fragments);
            }
        }
    }

    if delta.content.is_none() && delta.tool_calls.is_none() && delta.token_usage.is_none() {
        return Ok(None);
    }
    Ok(Some(delta))
}

#[async_trait]
impl Model for CompletionModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelResponse> {
        let body = self.request_body(&messages, &options, false);

        let raw: Value = with_rate_limit_retries(self.retry, || async {
            let response = self.post(&body, false).await?;
            response
                .json::<Value>()
                .await
                .map_err(|e| AgentError::generation(format!("malformed response body: {e}")))
        })
        .await?;

        let message_value = raw
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| AgentError::generation("response missing choices[0].message"))?;

        let mut content = message_value
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_owned);

        // Client-side stop handling for families without server-side support.
        if !self.supports_stop_parameter() {
            if let (Some(text), Some(stops)) = (&content, &options.stop_sequences) {
                content = Some(truncate_at_stop(text, stops));
            }
        }

        let message = ChatMessage {
            role: MessageRole::Assistant,
            content: content.map(MessageContent::Text),
            tool_calls: parse_tool_calls(message_value),
            raw: Some(raw.clone()),
            token_usage: parse_usage(&raw),
        };

        let usage = message.token_usage;
        let mut response = ModelResponse::new(message).with_raw(raw);
        if let Some(usage) = usage {
            response = response.with_token_usage(usage);
        }
        Ok(response)
    }

    async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelStream> {
        let body = self.request_body(&messages, &options, true);

        let response = with_rate_limit_retries(self.retry, || self.post(&body, true)).await?;
        let payloads = sse_payloads(Box::pin(response.bytes_stream()));

        let deltas = payloads.filter_map(|payload| async move {
            match payload {
                Ok(data) => parse_stream_chunk(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(deltas))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolDefinition, ToolInputs, ToolParam};

    fn model() -> CompletionModel {
        OpenAIClient::new("test-key").completion_model("gpt-4o")
    }

    #[test]
    fn test_request_body_includes_stop_and_tools() {
        let options = GenerateOptions::new()
            .with_stop_sequences(vec!["Observation:".to_owned()])
            .with_tools(vec![ToolDefinition {
                name: "add".to_owned(),
                description: "Add".to_owned(),
                parameters: crate::tool::inputs_to_json_schema(
                    &ToolInputs::new().param("a", ToolParam::number("a")),
                ),
            }]);

        let body = model().request_body(&[ChatMessage::user("hi")], &options, false);
        assert_eq!(body["stop"], json!(["Observation:"]));
        assert_eq!(body["tools"][0]["function"]["name"], "add");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_request_body_omits_stop_when_unsupported() {
        let model = OpenAIClient::new("k").completion_model("o3");
        let options =
            GenerateOptions::new().with_stop_sequences(vec!["Observation:".to_owned()]);
        let body = model.request_body(&[ChatMessage::user("hi")], &options, false);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_max_completion_tokens_for_o_series() {
        let model = OpenAIClient::new("k").completion_model("o1-mini");
        let options = GenerateOptions::new().with_max_tokens(256);
        let body = model.request_body(&[], &options, false);
        assert_eq!(body["max_completion_tokens"], json!(256));
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_wire_roles() {
        assert_eq!(wire_role(MessageRole::ToolResponse), "user");
        assert_eq!(wire_role(MessageRole::ToolCall), "assistant");
        assert_eq!(wire_role(MessageRole::System), "system");
    }

    #[test]
    fn test_parse_stream_chunk_with_tool_call_fragment() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","type":"function","function":{"name":"add","arguments":"{\"a\""}}]}}]}"#;
        let delta = parse_stream_chunk(data).unwrap().expect("delta");
        let calls = delta.tool_calls.unwrap();
        assert_eq!(calls[0].index, Some(0));
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"a\"")
        );
    }

    #[test]
    fn test_parse_stream_chunk_usage_only() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#;
        let delta = parse_stream_chunk(data).unwrap().expect("delta");
        assert_eq!(delta.token_usage, Some(TokenUsage::new(10, 5)));
    }

    #[test]
    fn test_parse_stream_chunk_empty_is_none() {
        let data = r#"{"choices":[{"delta":{}}]}"#;
        assert!(parse_stream_chunk(data).unwrap().is_none());
    }
}
