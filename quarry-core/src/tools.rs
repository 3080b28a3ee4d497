//! The tool seam between research agents and the outside world.
//!
//! Agents only know tools by name and see their output as plain text; URLs
//! are recovered from that text. Concrete tools live in `quarry-tools`.

use crate::error::ToolError;
use crate::types::Source;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Name of the web search tool.
pub const SEARCH_TOOL: &str = "search";
/// Name of the page fetch tool.
pub const FETCH_TOOL: &str = "fetch";

/// Executes named tools with JSON arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError>;

    /// Names of the tools this executor can run.
    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }
}

static URL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`\)\]\}]+"#).ok());

/// All distinct http(s) URLs in `text`, in order of first appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    let Some(re) = URL_RE.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Parse search tool output into sources.
///
/// Understands the numbered `Title / URL: ... / snippet` layout emitted by the
/// search tool and falls back to bare URLs for anything else.
pub fn parse_search_results(text: &str) -> Vec<Source> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(url) = line.strip_prefix("URL:") else {
            continue;
        };
        let url = url.trim().to_string();
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        let title = idx
            .checked_sub(1)
            .map(|prev| strip_list_number(lines[prev]))
            .filter(|t| !t.starts_with("URL:"))
            .unwrap_or_default();
        let snippet = lines
            .get(idx + 1)
            .filter(|next| !next.is_empty() && !next.starts_with("URL:"))
            .map(|next| next.to_string())
            .unwrap_or_default();
        sources.push(Source {
            url,
            title,
            snippet,
        });
    }

    if sources.is_empty() {
        sources = extract_urls(text)
            .into_iter()
            .map(|url| Source {
                url,
                title: String::new(),
                snippet: String::new(),
            })
            .collect();
    }
    sources
}

fn strip_list_number(line: &str) -> String {
    match line.split_once(". ") {
        Some((num, rest)) if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => {
            rest.trim().to_string()
        }
        _ => line.to_string(),
    }
}

/// Run a tool call, abort on cancellation, retry a transient failure once.
pub async fn call_tool(
    tools: &dyn ToolExecutor,
    name: &str,
    args: Value,
    cancel: &CancellationToken,
) -> Result<String, ToolError> {
    let mut retried = false;
    loop {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                name: name.to_string(),
            });
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled { name: name.to_string() }),
            result = tools.execute(name, args.clone()) => result,
        };
        match result {
            Err(e) if e.is_transient() && !retried => {
                warn!(tool = name, error = %e, "Transient tool failure, retrying once");
                retried = true;
            }
            other => return other,
        }
    }
}

type ToolResponder = Box<dyn Fn(&str, &Value) -> Result<String, ToolError> + Send + Sync>;

/// A scripted tool executor for tests.
pub struct MockToolExecutor {
    responder: ToolResponder,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    /// Every call returns `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_responder(move |_, _| Ok(text.clone()))
    }

    /// Every call fails with a non-transient error.
    pub fn failing() -> Self {
        Self::with_responder(|name, _| {
            Err(ToolError::InvalidArguments {
                name: name.to_string(),
                reason: "mock tool always fails".to_string(),
            })
        })
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every `(name, args)` pair seen so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn into_arc(self) -> Arc<dyn ToolExecutor> {
        Arc::new(self)
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let result = (self.responder)(name, &args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), args));
        }
        result
    }

    fn tool_names(&self) -> Vec<String> {
        vec![SEARCH_TOOL.to_string(), FETCH_TOOL.to_string()]
    }
}
