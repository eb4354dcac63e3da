//! Web search tool backed by pluggable, key-free search providers.
//!
//! [`WebSearchTool`] owns the tool contract; the actual lookup goes through
//! a [`SearchProvider`] so backends can be swapped or added without touching
//! the tool. Two key-free providers ship by default: DuckDuckGo's Lite HTML
//! interface and Bing's public RSS feed. Both are scraped best-effort and
//! suit low-volume agent queries, not bulk retrieval.

use std::fmt;
use std::fmt::Write as _;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::multimodal::AgentValue;
use crate::tool::{Tool, ToolError, ToolInputs, ToolParam};

/// Percent-encode a string for use as a URL query value.
///
/// Follows RFC 3986: unreserved characters (alphanumerics and `-._~`) pass
/// through, every other byte becomes `%XX`.
fn percent_encode(input: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut encoded = String::with_capacity(input.len() * 3 / 2);
    for byte in input.bytes() {
        let unreserved =
            byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~');
        if unreserved {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push(char::from(HEX[usize::from(byte >> 4)]));
            encoded.push(char::from(HEX[usize::from(byte & 0x0f)]));
        }
    }
    encoded
}

/// One hit returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SearchResult {
    /// Page title.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// Short description, possibly empty.
    pub snippet: String,
}

/// A search backend the tool can query.
#[async_trait]
pub trait SearchProvider: Send + Sync + fmt::Debug {
    /// Name used in debug output.
    fn provider_name(&self) -> &str;

    /// Run a query, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchResult>, ToolError>;
}

/// Provider behind dynamic dispatch.
pub type BoxedSearchProvider = Box<dyn SearchProvider>;

/// Search provider backed by DuckDuckGo Lite. **No API key required.**
///
/// DuckDuckGo may occasionally serve a CAPTCHA page instead of results;
/// this provider works best for low-volume queries.
#[derive(Debug, Clone)]
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGoProvider {
    /// Create a new provider with a browser-like User-Agent.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
            )
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Swap in a preconfigured HTTP client (proxy, timeouts).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Parse the Lite results page.
    ///
    /// The Lite interface is a plain table: each hit is an anchor with class
    /// `result-link`, followed by a cell with class `result-snippet`.
    /// Parsing the DOM (rather than pattern-matching the raw HTML) keeps
    /// this resilient to attribute reordering.
    fn parse_lite_page(html: &str) -> Vec<SearchResult> {
        let document = Html::parse_document(html);
        let Ok(link_selector) = Selector::parse("a.result-link") else {
            return Vec::new();
        };
        let Ok(snippet_selector) = Selector::parse(".result-snippet") else {
            return Vec::new();
        };

        let snippets: Vec<String> = document
            .select(&snippet_selector)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        document
            .select(&link_selector)
            .enumerate()
            .filter_map(|(i, anchor)| {
                let url = anchor.value().attr("href")?.to_owned();
                let title: String = anchor.text().collect::<String>().trim().to_owned();
                if url.is_empty() || title.is_empty() {
                    return None;
                }
                Some(SearchResult {
                    title,
                    url,
                    snippet: snippets.get(i).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn provider_name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let url = format!(
            "https://lite.duckduckgo.com/lite/?q={}",
            percent_encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("could not reach DuckDuckGo: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ToolError::execution(format!(
                "DuckDuckGo error (HTTP {status})"
            )));
        }

        let html = response.text().await.map_err(|e| {
            ToolError::execution(format!("could not read the DuckDuckGo page: {e}"))
        })?;

        Ok(Self::parse_lite_page(&html)
            .into_iter()
            .take(max_results)
            .collect())
    }
}

/// Search provider backed by Bing's public RSS feed. **No API key required.**
#[derive(Debug, Clone)]
pub struct BingProvider {
    client: reqwest::Client,
}

impl Default for BingProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Text of the first `<tag>...</tag>` element inside an XML fragment,
/// unwrapping a CDATA section when present.
fn xml_tag_text<'a>(fragment: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = fragment.find(&open)? + open.len();
    let end = start + fragment[start..].find(&close)?;
    let inner = fragment[start..end].trim();
    Some(
        inner
            .strip_prefix("<![CDATA[")
            .and_then(|rest| rest.strip_suffix("]]>"))
            .unwrap_or(inner),
    )
}

impl BingProvider {
    /// Create a new Bing RSS provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Swap in a preconfigured HTTP client (proxy, timeouts).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Pull `<item>` entries out of the RSS body.
    ///
    /// RSS is flat and regular enough that scanning item-by-item beats
    /// pulling in an XML parser for three fields.
    fn parse_feed(xml: &str) -> Vec<SearchResult> {
        xml.split("<item>")
            .skip(1)
            .filter_map(|chunk| {
                let item = chunk.split("</item>").next()?;
                let title = xml_tag_text(item, "title")?;
                let url = xml_tag_text(item, "link")?;
                if title.is_empty() || url.is_empty() {
                    return None;
                }
                Some(SearchResult {
                    title: title.to_owned(),
                    url: url.to_owned(),
                    snippet: xml_tag_text(item, "description").unwrap_or_default().to_owned(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for BingProvider {
    fn provider_name(&self) -> &str {
        "bing"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let url = format!(
            "https://www.bing.com/search?q={}&format=rss",
            percent_encode(query),
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("could not reach Bing: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ToolError::execution(format!("Bing error (HTTP {status})")));
        }

        let xml = response
            .text()
            .await
            .map_err(|e| ToolError::execution(format!("could not read the Bing feed: {e}")))?;

        Ok(Self::parse_feed(&xml)
            .into_iter()
            .take(max_results)
            .collect())
    }
}

/// Web search tool backed by a configurable [`SearchProvider`].
///
/// ```rust,ignore
/// let tool = WebSearchTool::duckduckgo().with_max_results(5);
/// ```
pub struct WebSearchTool {
    provider: BoxedSearchProvider,
    max_results: usize,
}

impl fmt::Debug for WebSearchTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSearchTool")
            .field("provider", &self.provider.provider_name())
            .field("max_results", &self.max_results)
            .finish()
    }
}

impl WebSearchTool {
    /// Build the tool over an arbitrary provider.
    pub fn new(provider: impl SearchProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            max_results: 5,
        }
    }

    /// Create a tool backed by DuckDuckGo Lite. **No API key required.**
    #[must_use]
    pub fn duckduckgo() -> Self {
        Self::new(DuckDuckGoProvider::new())
    }

    /// Create a tool backed by the Bing RSS feed. **No API key required.**
    #[must_use]
    pub fn bing() -> Self {
        Self::new(BingProvider::new())
    }

    /// Change the default hit count per query.
    #[must_use]
    pub const fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Render results for the observation: one block per hit with the URL
    /// on its own line so the agent can feed it to `visit_webpage`.
    fn render_results(query: &str, results: &[SearchResult]) -> String {
        let mut output = format!("Results for \"{query}\":\n");
        for (i, result) in results.iter().enumerate() {
            let _ = write!(output, "\n{}. {}\n   {}", i + 1, result.title, result.url);
            if !result.snippet.is_empty() {
                let _ = write!(output, "\n   {}", result.snippet);
            }
            output.push('\n');
        }
        output
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web and returns the top hits for a query: title, URL, and a short \
         snippet per result. Follow up with visit_webpage to read a result."
    }

    fn inputs(&self) -> &ToolInputs {
        static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
        INPUTS.get_or_init(|| {
            ToolInputs::new()
                .param("query", ToolParam::string("The search query to perform"))
                .param(
                    "max_results",
                    ToolParam::integer("Maximum number of results to return").nullable(),
                )
        })
    }

    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        if query.trim().is_empty() {
            return Err(ToolError::invalid_args("the query must not be empty"));
        }

        let max = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(self.max_results, |n| n as usize);

        let results = self.provider.search(query, max).await?;
        if results.is_empty() {
            return Err(ToolError::execution(
                "the search returned nothing; rephrase the query or broaden it",
            ));
        }

        Ok(AgentValue::text(Self::render_results(query, &results)))
    }
}
