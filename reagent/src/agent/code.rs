//! Code-action parsing for the code agent.
//!
//! The model is instructed to wrap its code in a configurable tag pair. The
//! driver extracts the first-opening / last-closing span, appends the
//! closing tag when the stop sequence removed it, and falls back to treating
//! the whole content as code when it already parses.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::interpreter;

/// The tag pair delimiting a code action.
#[derive(Debug, Clone)]
pub struct CodeTags {
    /// Opening tag.
    pub opening: String,
    /// Closing tag.
    pub closing: String,
}

impl Default for CodeTags {
    fn default() -> Self {
        Self {
            opening: "<code>".to_owned(),
            closing: "</code>".to_owned(),
        }
    }
}

impl CodeTags {
    /// Markdown-fence tags.
    #[must_use]
    pub fn markdown() -> Self {
        Self {
            opening: "```ruby".to_owned(),
            closing: "```".to_owned(),
        }
    }

    /// The closing tag is usable as a stop sequence only when stopping on
    /// it cannot swallow an opening (e.g. markdown fences share a prefix).
    #[must_use]
    pub fn closing_is_safe_stop(&self) -> bool {
        !self.opening.contains(&self.closing)
    }
}

/// Extract the code action from raw model output.
///
/// # Errors
///
/// [`AgentError::Parsing`] with a remediation hint when no tagged block is
/// found and the raw content is not itself a valid snippet.
pub fn parse_code_action(content: &str, tags: &CodeTags) -> Result<String> {
    let mut content = content.trim().to_owned();

    // The closing tag doubles as a stop sequence, so it is usually missing
    // from the returned text.
    if content.contains(&tags.opening) && !has_closing_after_opening(&content, tags) {
        content.push_str(&tags.closing);
    }

    if let Some(open_pos) = content.find(&tags.opening) {
        let after_open = open_pos + tags.opening.len();
        if let Some(close_rel) = content[after_open..].rfind(&tags.closing) {
            let code = &content[after_open..after_open + close_rel];
            return Ok(code.trim().to_owned());
        }
    }

    // No tags: accept the raw content when it is already a valid snippet.
    if interpreter::parse(&content).is_ok() {
        return Ok(content);
    }

    Err(AgentError::parsing(format!(
        "no code block found in the model output. Make sure to include code wrapped between \
         {} and {}, like: {}\nx = 1\n{}",
        tags.opening, tags.closing, tags.opening, tags.closing
    )))
}

fn has_closing_after_opening(content: &str, tags: &CodeTags) -> bool {
    content.find(&tags.opening).is_some_and(|open_pos| {
        content[open_pos + tags.opening.len()..].contains(&tags.closing)
    })
}

/// Extract the code action in structured-output mode: the content is a JSON
/// object carrying a `code` field.
///
/// # Errors
///
/// [`AgentError::Parsing`] for malformed JSON or a missing `code` field.
pub fn parse_structured_code_action(content: &str) -> Result<String> {
    let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
        AgentError::parsing(format!("structured output is not valid JSON: {e}"))
    })?;
    value
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AgentError::parsing("structured output has no 'code' string field"))
}
