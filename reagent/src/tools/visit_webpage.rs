//! Tool for visiting a webpage and reading its main content.
//!
//! Observations are a token budget, so the extraction is readability-first
//! rather than fidelity-first: page chrome (navigation, sidebars, forms,
//! footers) is pruned outright, styling markup is dropped because it costs
//! tokens without informing the model, and what survives is structure the
//! agent can actually reason over: headings, paragraphs, list items, code
//! blocks, and link targets.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{Map, Value};

use crate::multimodal::AgentValue;
use crate::tool::{Tool, ToolError, ToolInputs, ToolParam};

/// Elements whose entire subtree is page chrome or non-content, pruned
/// before extraction.
const PRUNED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "svg", "canvas", "iframe", "form",
    "button", "nav", "aside", "footer",
];

/// Visits a webpage at the given URL and extracts its readable content.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct VisitWebpageTool {
    /// Maximum output length in characters.
    pub max_output_length: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for VisitWebpageTool {
    fn default() -> Self {
        Self {
            max_output_length: 40_000,
            timeout_secs: 20,
        }
    }
}

/// Accumulates extracted text as a sequence of blocks.
///
/// Inline text flows into the current block with whitespace normalized to
/// single spaces; block-level boundaries close the current block. Blocks
/// are joined with one blank line, so run-away `<div>` nesting can never
/// produce runs of empty lines.
#[derive(Default)]
struct BlockWriter {
    blocks: Vec<String>,
    current: String,
    prefix: String,
}

impl BlockWriter {
    /// Append inline text to the current block, one space between words.
    fn inline(&mut self, text: &str) {
        for word in text.split_whitespace() {
            if !self.current.is_empty() {
                self.current.push(' ');
            }
            self.current.push_str(word);
        }
    }

    /// Close the current block and start a prefixed one (heading marker,
    /// list bullet).
    fn open(&mut self, prefix: String) {
        self.close();
        self.prefix = prefix;
    }

    /// Close the current block, keeping it only if it holds any text.
    fn close(&mut self) {
        if !self.current.is_empty() {
            let mut block = std::mem::take(&mut self.prefix);
            block.push_str(&self.current);
            self.blocks.push(block);
            self.current.clear();
        } else {
            self.prefix.clear();
        }
    }

    /// Append a preformatted block verbatim, fenced.
    fn verbatim(&mut self, text: &str) {
        self.close();
        let body = text.trim_matches('\n');
        if !body.is_empty() {
            self.blocks.push(format!("```\n{body}\n```"));
        }
    }

    fn into_text(mut self) -> String {
        self.close();
        self.blocks.join("\n\n")
    }
}

impl VisitWebpageTool {
    /// Create a new webpage visitor tool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum output length.
    #[must_use]
    pub const fn with_max_output_length(mut self, max: usize) -> Self {
        self.max_output_length = max;
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Clip extracted text to the configured budget, on a char boundary.
    fn clip(&self, text: &str) -> String {
        if text.len() <= self.max_output_length {
            return text.to_owned();
        }
        let mut cut = self.max_output_length;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}\n[truncated: page continues beyond {} characters]",
            &text[..cut],
            self.max_output_length
        )
    }

    /// Extract readable text from an HTML document.
    fn extract_page_text(html: &str) -> String {
        let document = Html::parse_document(html);
        let mut writer = BlockWriter::default();

        let body = Selector::parse("body")
            .ok()
            .and_then(|selector| document.select(&selector).next());
        match body {
            Some(body) => Self::walk(&body, &mut writer, 0),
            None => Self::walk(&document.root_element(), &mut writer, 0),
        }
        writer.into_text()
    }

    /// All text beneath an element, whitespace-normalized, ignoring pruned
    /// subtrees. Used for elements rendered as a single line.
    fn flat_text(element: &ElementRef<'_>) -> String {
        let mut writer = BlockWriter::default();
        Self::walk(element, &mut writer, 0);
        let mut text = writer.into_text();
        if text.contains('\n') {
            text = text.replace('\n', " ");
        }
        text
    }

    fn walk(element: &ElementRef<'_>, writer: &mut BlockWriter, list_depth: usize) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => writer.inline(&text.text),
                Node::Element(raw) => {
                    let tag = raw.name();
                    if PRUNED_TAGS.contains(&tag) {
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };

                    match tag {
                        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                            let level = usize::from(tag.as_bytes()[1] - b'0');
                            writer.open(format!("{} ", "#".repeat(level)));
                            writer.inline(&Self::flat_text(&child_el));
                            writer.close();
                        }
                        "li" => {
                            writer.open(format!("{}- ", "  ".repeat(list_depth)));
                            Self::walk(&child_el, writer, list_depth + 1);
                            writer.close();
                        }
                        "ul" | "ol" => {
                            writer.close();
                            Self::walk(&child_el, writer, list_depth);
                            writer.close();
                        }
                        "pre" => {
                            let raw_text: String = child_el.text().collect();
                            writer.verbatim(&raw_text);
                        }
                        "a" => {
                            // The model needs the target, not an anchor it
                            // cannot click: render as `label (url)`.
                            let label = Self::flat_text(&child_el);
                            if !label.is_empty() {
                                writer.inline(&label);
                                if let Some(href) = raw.attr("href") {
                                    if href.starts_with("http://")
                                        || href.starts_with("https://")
                                    {
                                        writer.inline(&format!("({href})"));
                                    }
                                }
                            }
                        }
                        // Block-level containers split paragraphs; their
                        // markup carries no other meaning here.
                        "p" | "div" | "section" | "article" | "main" | "header" | "table"
                        | "tr" | "blockquote" | "br" | "hr" | "figure" | "details" => {
                            writer.close();
                            Self::walk(&child_el, writer, list_depth);
                            writer.close();
                        }
                        // Everything else (spans, emphasis, code spans,
                        // cells) flows inline.
                        _ => Self::walk(&child_el, writer, list_depth),
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Tool for VisitWebpageTool {
    fn name(&self) -> &str {
        "visit_webpage"
    }

    fn description(&self) -> &str {
        "Visits a webpage at the given URL and reads its content as a markdown string. Use this \
         to browse webpages."
    }

    fn inputs(&self) -> &ToolInputs {
        static INPUTS: std::sync::OnceLock<ToolInputs> = std::sync::OnceLock::new();
        INPUTS.get_or_init(|| {
            ToolInputs::new().param(
                "url",
                ToolParam::string(
                    "The URL of the webpage to visit (must be a valid HTTP/HTTPS URL)",
                ),
            )
        })
    }

    async fn forward(&self, args: Map<String, Value>) -> Result<AgentValue, ToolError> {
        let url = args.get("url").and_then(Value::as_str).unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::invalid_args(
                "URL must start with http:// or https://",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0")
            .build()
            .map_err(|e| ToolError::execution(e.to_string()))?;

        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::execution("Request timed out. Please try again later.")
            } else {
                ToolError::execution(format!("Error fetching webpage: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(ToolError::execution(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ToolError::execution(format!("Failed to read response: {e}")))?;

        let text = Self::extract_page_text(&html);
        Ok(AgentValue::text(self.clip(&text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_paragraphs() {
        let html = "<html><body><h2>Section</h2><p>First   paragraph\nwith  noise.</p>\
                    <p>Second.</p></body></html>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert_eq!(text, "## Section\n\nFirst paragraph with noise.\n\nSecond.");
    }

    #[test]
    fn test_nested_lists_are_indented() {
        let html = "<body><ul><li>outer<ul><li>inner</li></ul></li><li>second</li></ul></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert!(text.contains("- outer"));
        assert!(text.contains("\n\n  - inner"));
        assert!(text.contains("- second"));
    }

    #[test]
    fn test_links_render_label_and_target() {
        let html = "<body><p>See <a href=\"https://e.com/doc\">the docs</a> here; \
                    <a href=\"/relative\">internal</a>.</p></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert!(text.contains("the docs (https://e.com/doc)"));
        // Relative targets are useless to the agent; keep the label only.
        assert!(text.contains("internal"));
        assert!(!text.contains("/relative"));
    }

    #[test]
    fn test_chrome_is_pruned() {
        let html = "<body><nav>Home | About</nav><script>x()</script>\
                    <aside>ads</aside><p>Content.</p><footer>(c) 2025</footer></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert_eq!(text, "Content.");
    }

    #[test]
    fn test_pre_blocks_are_fenced_verbatim() {
        let html = "<body><pre>let x = 1;\nlet y = 2;</pre></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert_eq!(text, "```\nlet x = 1;\nlet y = 2;\n```");
    }

    #[test]
    fn test_styling_markup_flows_inline() {
        let html = "<body><p>Some <strong>bold</strong> and <em>italic</em> and \
                    <code>code()</code>.</p></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert_eq!(text, "Some bold and italic and code() .");
    }

    #[test]
    fn test_no_blank_line_runs_from_nesting() {
        let html = "<body><div><div><div><p>deep</p></div></div></div>\
                    <div></div><p>after</p></body>";
        let text = VisitWebpageTool::extract_page_text(html);
        assert!(!text.contains("\n\n\n"));
        assert_eq!(text, "deep\n\nafter");
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        let tool = VisitWebpageTool::new().with_max_output_length(9);
        let clipped = tool.clip("héllo wörld");
        assert!(clipped.contains("[truncated"));
        assert!(clipped.starts_with("héllo w"));
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let tool = VisitWebpageTool::new();
        let err = crate::tool::invoke_tool(
            &tool,
            &serde_json::json!({"url": "file:///etc/passwd"}),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
