//! Perspective discovery.
//!
//! Surveys the topic with a few exploratory searches, asks the model for a
//! set of expert angles grounded on what the survey found, and always keeps
//! a baseline fact-finding perspective for foundational coverage.

use super::parse::truncate_chars;
use super::{AgentContext, degrade};
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::types::{CostBreakdown, Perspective};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const SYSTEM: &str = "You plan multi-perspective research. Reply with JSON only when asked for JSON.";

/// Results per survey search.
const SURVEY_RESULTS: usize = 3;
const MAX_SURVEY_QUERIES: usize = 5;
/// Characters kept from each survey result block in the persona prompt.
const SURVEY_EXCERPT_CHARS: usize = 1500;

/// Name of the baseline perspective.
pub const BASELINE_NAME: &str = "Basic Fact Writer";

/// Output of perspective discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub perspectives: Vec<Perspective>,
    pub survey_queries: Vec<String>,
}

/// Where a session's perspectives come from.
///
/// Model spend goes into `cost` as it happens, so it is kept when discovery
/// is cancelled halfway.
#[async_trait]
pub trait PerspectiveSource: Send + Sync {
    async fn discover(
        &self,
        ctx: &AgentContext,
        config: &ResearchConfig,
        query: &str,
        cost: &mut CostBreakdown,
    ) -> Result<Discovery>;
}

/// The default source: survey the topic, then ask the model for experts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurveyDiscovery;

#[async_trait]
impl PerspectiveSource for SurveyDiscovery {
    async fn discover(
        &self,
        ctx: &AgentContext,
        config: &ResearchConfig,
        query: &str,
        cost: &mut CostBreakdown,
    ) -> Result<Discovery> {
        PerspectiveDiscoverer::new(ctx, config)
            .discover(query, cost)
            .await
    }
}

/// The fixed perspective covering definitions, components and history.
pub fn baseline_perspective(query: &str) -> Perspective {
    Perspective::new(
        BASELINE_NAME,
        "Fundamental information and essential definitions",
        vec![
            format!("What is {} and how is it defined?", query),
            format!("What are the key components or elements of {}?", query),
            format!("What is the history or origin of {}?", query),
        ],
    )
}

fn is_baseline(perspective: &Perspective) -> bool {
    let name = perspective.name.to_lowercase();
    ["basic", "fact", "foundational"]
        .iter()
        .any(|k| name.contains(k))
}

#[derive(Debug, Deserialize)]
struct ProposedPerspective {
    #[serde(default)]
    name: String,
    #[serde(default)]
    focus: String,
    #[serde(default)]
    questions: Vec<String>,
}

/// Finds the expert angles a topic should be researched from.
pub struct PerspectiveDiscoverer<'a> {
    ctx: &'a AgentContext,
    config: &'a ResearchConfig,
}

impl<'a> PerspectiveDiscoverer<'a> {
    pub fn new(ctx: &'a AgentContext, config: &'a ResearchConfig) -> Self {
        Self { ctx, config }
    }

    /// Survey the topic and propose perspectives.
    ///
    /// Only cancellation is returned as an error; model or tool failures
    /// degrade to the baseline perspective.
    pub async fn discover(&self, query: &str, cost: &mut CostBreakdown) -> Result<Discovery> {
        let survey_queries = self.survey_queries(query, cost).await?;
        let survey = self.run_survey(&survey_queries).await?;
        debug!(
            queries = survey_queries.len(),
            results = survey.len(),
            "Topic survey finished"
        );

        let proposed = degrade(
            self.ctx
                .ask_json::<Vec<ProposedPerspective>>(
                    SYSTEM,
                    &persona_prompt(query, &survey),
                    cost,
                )
                .await,
            "perspective proposal",
        )?
        .flatten()
        .unwrap_or_default();

        let perspectives = self.finalize(query, proposed);
        info!(
            count = perspectives.len(),
            names = ?perspectives.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Perspectives discovered"
        );
        Ok(Discovery {
            perspectives,
            survey_queries,
        })
    }

    async fn survey_queries(&self, query: &str, cost: &mut CostBreakdown) -> Result<Vec<String>> {
        let prompt = format!(
            "For the topic: \"{query}\"\n\n\
Generate 3-5 search queries that would find related topics and subtopics.\n\
Cover different angles: technical aspects, history, applications, controversies and related fields.\n\n\
Return a JSON array of strings: [\"query1\", \"query2\", ...]"
        );
        let queries: Vec<String> = degrade(
            self.ctx.ask_json::<Vec<String>>(SYSTEM, &prompt, cost).await,
            "survey queries",
        )?
        .flatten()
        .unwrap_or_default()
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(MAX_SURVEY_QUERIES)
        .collect();

        if queries.is_empty() {
            return Ok(vec![query.to_string()]);
        }
        Ok(queries)
    }

    async fn run_survey(&self, queries: &[String]) -> Result<Vec<String>> {
        let mut results = Vec::new();
        for q in queries {
            match self.ctx.search(q, SURVEY_RESULTS).await {
                Ok(text) => results.push(text),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(query = %q, error = %e, "Survey search failed; skipping"),
            }
        }
        Ok(results)
    }

    /// Clean, de-duplicate, add the baseline and cap the proposal.
    fn finalize(&self, query: &str, proposed: Vec<ProposedPerspective>) -> Vec<Perspective> {
        let mut seen = HashSet::new();
        let mut perspectives: Vec<Perspective> = proposed
            .into_iter()
            .filter_map(|p| {
                let name = p.name.trim().to_string();
                if name.is_empty() || !seen.insert(name.to_lowercase()) {
                    return None;
                }
                let questions = p
                    .questions
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                Some(Perspective::new(name, p.focus.trim(), questions))
            })
            .collect();

        if perspectives.is_empty() {
            warn!("No usable perspectives proposed; falling back to the baseline perspective");
            return vec![baseline_perspective(query)];
        }

        if let Some(idx) = perspectives.iter().position(is_baseline) {
            let baseline = perspectives.remove(idx);
            perspectives.insert(0, baseline);
        } else {
            perspectives.insert(0, baseline_perspective(query));
        }
        perspectives.truncate(self.config.max_perspectives.max(1));
        perspectives
    }
}

fn persona_prompt(query: &str, survey: &[String]) -> String {
    let inspiration = if survey.is_empty() {
        "(No related topics found; use your knowledge to pick diverse perspectives.)".to_string()
    } else {
        survey
            .iter()
            .map(|s| truncate_chars(s, SURVEY_EXCERPT_CHARS))
            .collect::<Vec<_>>()
            .join("\n---\n")
    };
    format!(
        "For the research topic: \"{query}\"\n\n\
Select a group of 3-6 research experts who together will produce a comprehensive report.\n\
Each expert represents a distinct perspective, role or affiliation related to the topic.\n\n\
Related material found while surveying the topic:\n{inspiration}\n\n\
For each expert give:\n\
1. name (e.g. \"Technical Expert\", \"Industry Analyst\")\n\
2. focus: what they prioritize\n\
3. questions: 3-4 key questions they would investigate\n\n\
Return a JSON array: [{{\"name\": \"...\", \"focus\": \"...\", \"questions\": [\"...\"]}}]"
    )
}
