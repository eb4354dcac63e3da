//! HTTP client for OpenAI-compatible endpoints.

use std::sync::Arc;
use std::time::Duration;

/// Default API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible API.
///
/// One client can hand out any number of [`CompletionModel`]s; they share
/// its connection pool. A custom base URL points the same wire protocol at
/// Azure, routers, or local inference servers.
///
/// ```rust,ignore
/// let model = OpenAIClient::from_env()
///     .with_base_url("https://my-router.example.com/v1")
///     .completion_model("gpt-4o");
/// ```
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: Arc<str>,
    base_url: Arc<str>,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<hidden>")
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    /// Create a client with the given API key and the default base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into().into(),
            base_url: OPENAI_API_BASE_URL.into(),
        }
    }

    /// Create a client from the environment: `OPENAI_API_KEY` (required)
    /// and `OPENAI_BASE_URL` (optional).
    ///
    /// # Panics
    ///
    /// Panics if `OPENAI_API_KEY` is not set.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key =
            std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY environment variable not set");
        let client = Self::new(api_key);
        match std::env::var("OPENAI_BASE_URL") {
            Ok(base_url) => client.with_base_url(base_url),
            Err(_) => client,
        }
    }

    /// Point the client at a different base URL; a trailing slash is
    /// stripped so path joining stays predictable.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut url = base_url.into();
        while url.ends_with('/') {
            url.pop();
        }
        self.base_url = url.into();
        self
    }

    /// Apply a request timeout to every call made through this client.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client cannot be rebuilt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        self
    }

    /// Create a completion model bound to the given model ID.
    #[must_use]
    pub fn completion_model(&self, model_id: impl Into<String>) -> super::CompletionModel {
        super::CompletionModel::new(self.clone(), model_id)
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start an authenticated POST to an endpoint path under the base URL.
    pub(super) fn post_json(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(self.api_key.as_ref())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }
}
