//! Source bookkeeping and fact extraction shared by both worker loops.

use super::AgentContext;
use crate::error::Result;
use crate::tools::parse_search_results;
use crate::types::{CostBreakdown, Fact, Source};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

const SYSTEM: &str = "You extract verifiable factual claims from research material. Reply with JSON only.";

/// Confidence assigned when the model gives none.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Sources a single worker has visited, de-duplicated by URL.
#[derive(Debug, Default, Clone)]
pub struct VisitedSources {
    sources: Vec<Source>,
    seen: HashSet<String>,
}

impl VisitedSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sources in a search result; returns the newly seen URLs.
    pub fn record_search(&mut self, text: &str) -> Vec<String> {
        parse_search_results(text)
            .into_iter()
            .filter_map(|source| self.insert(source))
            .collect()
    }

    fn insert(&mut self, source: Source) -> Option<String> {
        if !self.seen.insert(normalize_url(&source.url)) {
            return None;
        }
        let url = source.url.clone();
        self.sources.push(source);
        Some(url)
    }

    /// The visited URL `url` refers to, if any.
    pub fn resolve(&self, url: &str) -> Option<&str> {
        let wanted = normalize_url(url);
        if !self.seen.contains(&wanted) {
            return None;
        }
        self.sources
            .iter()
            .find(|s| normalize_url(&s.url) == wanted)
            .map(|s| s.url.as_str())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn into_sources(self) -> Vec<Source> {
        self.sources
    }
}

/// Comparison key for URLs: no fragment, lowercase host, no trailing slash.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => {
            let url = url.split_once('#').map(|(base, _)| base).unwrap_or(url);
            url.trim_end_matches('/').to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct FactCandidate {
    #[serde(default)]
    content: String,
    #[serde(default, alias = "source_url", alias = "url")]
    source: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Ask the model for facts in `material` and keep the ones with provenance.
///
/// A fact survives only if its source is a URL this worker visited; the
/// stored URL is the visited one. Failure to parse yields no facts.
pub async fn extract_facts(
    ctx: &AgentContext,
    query: &str,
    perspective: &str,
    material: &str,
    visited: &VisitedSources,
    cost: &mut CostBreakdown,
) -> Result<Vec<Fact>> {
    if material.trim().is_empty() || visited.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = format!(
        "From this research material about \"{query}\", extract the key factual claims.\n\n\
{material}\n\n\
Return a JSON array:\n\
[{{\"content\": \"factual claim\", \"source\": \"URL the claim came from\", \"confidence\": 0.8}}]\n\n\
Only include verifiable facts, not opinions. Every fact must name the exact URL it came from."
    );
    let candidates = ctx
        .ask_json::<Vec<FactCandidate>>(SYSTEM, &prompt, cost)
        .await?
        .unwrap_or_default();
    let total = candidates.len();
    let facts = keep_provenanced(candidates, visited, perspective);
    debug!(
        perspective,
        proposed = total,
        kept = facts.len(),
        "Facts extracted"
    );
    Ok(facts)
}

fn keep_provenanced(
    candidates: Vec<FactCandidate>,
    visited: &VisitedSources,
    perspective: &str,
) -> Vec<Fact> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|c| {
            let content = c.content.trim().to_string();
            if content.is_empty() || !seen.insert(content.to_lowercase()) {
                return None;
            }
            let source_url = visited.resolve(&c.source)?.to_string();
            Some(Fact {
                content,
                source_url,
                confidence: c.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
                perspective: perspective.to_string(),
            })
        })
        .collect()
}

/// Merge per-worker fact lists, dropping repeated claims.
pub fn merge_facts(into: &mut Vec<Fact>, more: Vec<Fact>) {
    let mut seen: HashSet<String> = into.iter().map(|f| f.content.to_lowercase()).collect();
    into.extend(
        more.into_iter()
            .filter(|f| seen.insert(f.content.to_lowercase())),
    );
}
