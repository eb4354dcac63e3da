//! Built-in tools, registered under stable string names.
//!
//! The core runtime only depends on the `final_answer` convention; the rest
//! are optional collaborators a front-end can enable by name.

mod code_interpreter;
mod final_answer;
mod user_input;
mod visit_webpage;
mod web_search;

pub use code_interpreter::CodeInterpreterTool;
pub use final_answer::FinalAnswerTool;
pub use user_input::UserInputTool;
pub use visit_webpage::VisitWebpageTool;
pub use web_search::{
    BingProvider, BoxedSearchProvider, DuckDuckGoProvider, SearchProvider, SearchResult,
    WebSearchTool,
};

use std::sync::Arc;

use crate::tool::SharedTool;

/// Names of all built-in tools.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "final_answer",
    "user_input",
    "code_interpreter",
    "web_search",
    "visit_webpage",
];

/// Instantiate a built-in tool by its stable name.
#[must_use]
pub fn builtin_tool(name: &str) -> Option<SharedTool> {
    match name {
        "final_answer" => Some(Arc::new(FinalAnswerTool::new())),
        "user_input" => Some(Arc::new(UserInputTool::new())),
        "code_interpreter" => Some(Arc::new(CodeInterpreterTool::new())),
        "web_search" => Some(Arc::new(WebSearchTool::duckduckgo())),
        "visit_webpage" => Some(Arc::new(VisitWebpageTool::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_name_resolves() {
        for name in BUILTIN_TOOL_NAMES {
            let tool = builtin_tool(name).expect("builtin resolves");
            assert_eq!(tool.name(), *name);
        }
        assert!(builtin_tool("nope").is_none());
    }
}
