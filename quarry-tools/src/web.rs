//! Web tools: search and fetch.
//!
//! - `search`: Brave Search web results as numbered `Title / URL: / snippet` blocks.
//! - `fetch`: download a page and reduce it to readable text.

use crate::registry::Tool;
use async_trait::async_trait;
use quarry_core::config::SearchConfig;
use quarry_core::error::ToolError;
use quarry_core::research::parse::truncate_chars;
use quarry_core::tools::{FETCH_TOOL, SEARCH_TOOL};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; QuarryResearch/0.3)";
const DEFAULT_COUNT: u64 = 10;
const MAX_COUNT: u64 = 20;

fn http_client(name: &str, timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ToolError::ExecutionFailed {
            name: name.to_string(),
            message: format!("Failed to create HTTP client: {}", e),
        })
}

fn request_error(name: &str, timeout: Duration, e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout {
            name: name.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        ToolError::ExecutionFailed {
            name: name.to_string(),
            message: format!("Request failed: {}", e),
        }
    }
}

fn status_error(name: &str, status: reqwest::StatusCode, detail: &str) -> ToolError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ToolError::RateLimited {
            name: name.to_string(),
        };
    }
    let message = format!("HTTP {}: {}", status.as_u16(), truncate_chars(detail, 200));
    if status.is_server_error() {
        ToolError::ExecutionFailed {
            name: name.to_string(),
            message,
        }
    } else {
        ToolError::InvalidArguments {
            name: name.to_string(),
            reason: message,
        }
    }
}

// ---------------------------------------------------------------------------
// BraveSearchTool
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: BraveWeb,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

/// Web search through the Brave Search API.
pub struct BraveSearchTool {
    api_key: String,
    timeout: Duration,
}

impl BraveSearchTool {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
        std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Self::new(key, Duration::from_secs(config.timeout_secs)))
    }
}

#[async_trait]
impl Tool for BraveSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web. Returns numbered results with title, URL and a short description."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (default: 10, max: 20)",
                    "default": DEFAULT_COUNT
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                name: SEARCH_TOOL.into(),
                reason: "Missing required parameter: query".into(),
            })?;
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_COUNT)
            .clamp(1, MAX_COUNT);

        debug!(query, count, "Brave search");
        let client = http_client(SEARCH_TOOL, self.timeout)?;
        let response = client
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", query.to_string()), ("count", count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| request_error(SEARCH_TOOL, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(SEARCH_TOOL, status, &body));
        }

        let body: BraveResponse =
            response
                .json()
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name: SEARCH_TOOL.into(),
                    message: format!("Failed to parse search response: {}", e),
                })?;
        Ok(format_results(&body.web.results))
    }
}

fn format_results(results: &[BraveResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {}\n   URL: {}\n   {}\n",
                i + 1,
                strip_tags(&r.title),
                r.url,
                strip_tags(&r.description)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// WebFetchTool
// ---------------------------------------------------------------------------

/// Fetch a URL and reduce it to readable text.
pub struct WebFetchTool {
    max_chars: usize,
    timeout: Duration,
}

impl WebFetchTool {
    pub fn new(max_chars: usize, timeout: Duration) -> Self {
        Self { max_chars, timeout }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.max_fetch_chars,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        FETCH_TOOL
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its text content with markup removed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let url = args.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
            ToolError::InvalidArguments {
                name: FETCH_TOOL.into(),
                reason: "Missing required parameter: url".into(),
            }
        })?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments {
                name: FETCH_TOOL.into(),
                reason: "URL must start with http:// or https://".into(),
            });
        }

        let client = http_client(FETCH_TOOL, self.timeout)?;
        let response = client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| request_error(FETCH_TOOL, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(FETCH_TOOL, status, url));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: FETCH_TOOL.into(),
                message: format!("Failed to read response body: {}", e),
            })?;

        let text = if content_type.is_empty() || content_type.contains("html") {
            html_to_text(&body)
        } else {
            collapse_whitespace(&body)
        };
        Ok(format!(
            "Content from {}:\n\n{}",
            url,
            truncate_chars(&text, self.max_chars)
        ))
    }
}

static SKIPPED_BLOCKS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|svg|head)\b.*?</(script|style|noscript|svg|head)\s*>").ok()
});
static COMMENTS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());
static TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn replace_all(re: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

fn strip_tags(text: &str) -> String {
    decode_entities(&replace_all(&TAGS, text, ""))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    replace_all(&WHITESPACE, text, " ").trim().to_string()
}

/// Strip markup, scripts and styles, leaving whitespace-normalized text.
fn html_to_text(html: &str) -> String {
    let text = replace_all(&SKIPPED_BLOCKS, html, " ");
    let text = replace_all(&COMMENTS, &text, " ");
    let text = replace_all(&TAGS, &text, " ");
    collapse_whitespace(&decode_entities(&text))
}
