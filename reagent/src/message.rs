//! Canonical chat-message model and streaming-delta agglomeration.
//!
//! Every model provider maps its wire format into [`ChatMessage`]; the agent
//! only ever sees this shape. Streaming providers yield
//! [`ChatMessageStreamDelta`] fragments which [`aggregate_stream_deltas`]
//! reconciles back into a single canonical message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::monitor::TokenUsage;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// A record of tool invocations made by the assistant.
    ToolCall,
    /// A tool's observation returned to the model.
    ToolResponse,
}

impl MessageRole {
    /// Wire-format string for this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolCall => "tool-call",
            Self::ToolResponse => "tool-response",
        }
    }
}

/// One element of a multi-part message content list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// An image, base64-encoded at the wire boundary.
    Image {
        /// Base64 payload (or a URL for remote images).
        image: String,
    },
}

/// Message content: either plain text or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Ordered multi-part content.
    Parts(Vec<ContentPart>),
}

/// The function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments: a JSON object, or a JSON-encoded string while streaming.
    pub arguments: Value,
}

/// A structured tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageToolCall {
    /// Provider-assigned call id, unique within one assistant turn.
    pub id: String,
    /// Call type; providers currently only emit `"function"`.
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// The function name and arguments.
    pub function: ToolCallFunction,
}

fn default_call_type() -> String {
    "function".to_owned()
}

impl ChatMessageToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }

    /// The tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Arguments as a JSON object, parsing the string form if the provider
    /// streamed them as text.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the string form is malformed.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        match &self.function.arguments {
            Value::String(s) => serde_json::from_str(s),
            other => Ok(other.clone()),
        }
    }
}

/// A chat message in the canonical shape shared by memory, providers, and
/// the wire boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender.
    pub role: MessageRole,
    /// Content, absent for pure tool-call turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Structured tool calls attached to an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatMessageToolCall>>,
    /// Opaque raw provider response, never serialized.
    #[serde(skip)]
    pub raw: Option<Value>,
    /// Token usage reported for this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl ChatMessage {
    /// Create a message with the given role and text content.
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            raw: None,
            token_usage: None,
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    /// Create a tool-call record message.
    pub fn tool_call(text: impl Into<String>) -> Self {
        Self::new(MessageRole::ToolCall, text)
    }

    /// Create a tool-response (observation) message.
    pub fn tool_response(text: impl Into<String>) -> Self {
        Self::new(MessageRole::ToolResponse, text)
    }

    /// Create a message whose content is a list of typed parts.
    #[must_use]
    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            raw: None,
            token_usage: None,
        }
    }

    /// Attach tool calls.
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ChatMessageToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    /// Attach token usage.
    #[must_use]
    pub const fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Concatenated text of the content, ignoring non-text parts.
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text.clone()),
            Some(MessageContent::Parts(parts)) => {
                let mut out = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
                Some(out)
            }
            None => None,
        }
    }

    /// Whether the message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// Streaming fragment of a tool call, keyed by `index`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallStreamDelta {
    /// Slot index; fragments with the same index belong to one call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Call id fragment; first sighting wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type fragment; first sighting wins.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name/arguments fragments, appended in arrival order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionStreamDelta>,
}

/// Streaming fragments of a tool call's function payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionStreamDelta {
    /// Name fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arguments string fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Partial shape of a streamed model message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageStreamDelta {
    /// Incremental content text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool-call fragments carried by this delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallStreamDelta>>,
    /// Usage carried by this delta (summed during agglomeration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    call_type: Option<String>,
    name: String,
    arguments: String,
}

/// Reconcile an ordered list of stream deltas into one assistant message.
///
/// Content fragments are concatenated in order. Tool-call fragments are
/// merged into accumulator slots keyed by `index` (falling back to the
/// fragment's position within its delta when the provider omits `index`;
/// ordering is meaningful in that case): `id` and `type` are first-write-wins,
/// `name` and `arguments` are appended as string fragments. Token usage is
/// summed across all deltas that carry it.
#[must_use]
pub fn aggregate_stream_deltas(deltas: &[ChatMessageStreamDelta]) -> ChatMessage {
    let mut content = String::new();
    let mut slots: Vec<(usize, ToolCallAccumulator)> = Vec::new();
    let mut usage = TokenUsage::default();

    for delta in deltas {
        if let Some(text) = &delta.content {
            content.push_str(text);
        }

        if let Some(fragments) = &delta.tool_calls {
            for (pos, fragment) in fragments.iter().enumerate() {
                let key = fragment.index.unwrap_or(pos);
                let slot_index = match slots.iter().position(|(k, _)| *k == key) {
                    Some(index) => index,
                    None => {
                        slots.push((key, ToolCallAccumulator::default()));
                        slots.len() - 1
                    }
                };
                let slot = &mut slots[slot_index].1;

                if slot.id.is_none() {
                    slot.id.clone_from(&fragment.id);
                }
                if slot.call_type.is_none() {
                    slot.call_type.clone_from(&fragment.call_type);
                }
                if let Some(function) = &fragment.function {
                    if let Some(name) = &function.name {
                        slot.name.push_str(name);
                    }
                    if let Some(arguments) = &function.arguments {
                        slot.arguments.push_str(arguments);
                    }
                }
            }
        }

        if let Some(delta_usage) = delta.token_usage {
            usage += delta_usage;
        }
    }

    slots.sort_by_key(|(key, _)| *key);
    let tool_calls: Vec<ChatMessageToolCall> = slots
        .into_iter()
        .map(|(_, acc)| ChatMessageToolCall {
            id: acc.id.unwrap_or_default(),
            call_type: acc.call_type.unwrap_or_else(default_call_type),
            function: ToolCallFunction {
                name: acc.name,
                arguments: Value::String(acc.arguments),
            },
        })
        .collect();

    ChatMessage {
        role: MessageRole::Assistant,
        content: (!content.is_empty()).then(|| MessageContent::Text(content)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        raw: None,
        token_usage: usage.has_tokens().then_some(usage),
    }
}
