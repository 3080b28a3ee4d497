//! Lenient extraction of structured data from model replies.

use serde::de::DeserializeOwned;

/// Decode the JSON value embedded in a model reply.
///
/// Accepts bare JSON, fenced code blocks and JSON surrounded by prose; for
/// the latter the text between the first opening and the last matching
/// closing bracket is tried.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let object = span(trimmed, '{', '}');
    let array = span(trimmed, '[', ']');
    let mut candidates = [object, array];
    // Try the span that opens first; it encloses the other one if they nest.
    candidates.sort_by_key(|c| c.map(|(start, _)| start).unwrap_or(usize::MAX));
    candidates
        .into_iter()
        .flatten()
        .find_map(|(start, end)| serde_json::from_str(&trimmed[start..=end]).ok())
}

/// Parse a JSON string array out of a reply, dropping blank entries.
pub fn parse_string_array(text: &str) -> Vec<String> {
    extract_json::<Vec<String>>(text)
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then_some((start, end))
}
