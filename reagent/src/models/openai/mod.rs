//! OpenAI-compatible chat-completions backend.
//!
//! Covers OpenAI's official API plus compatible endpoints (Azure, local
//! proxies, third-party routers) through a custom base URL.

mod client;
mod completion;

pub use client::{OpenAIClient, OPENAI_API_BASE_URL};
pub use completion::CompletionModel;
