//! Cross-validation, contradiction detection and gap finding over the
//! facts every worker gathered.
//!
//! Each step has a deterministic fallback, so analysis only fails when the
//! session is cancelled.

use super::contradiction::{ContradictionDetector, keywords};
use super::{AgentContext, degrade};
use crate::error::Result;
use crate::types::{
    AnalysisResult, Contradiction, ContradictionNature, CostBreakdown, Fact, KnowledgeGap,
    ValidatedFact,
};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

const SYSTEM: &str = "You are a rigorous research analyst who checks claims against each other.";

/// Facts cross-validated per model call.
pub const VALIDATION_BATCH: usize = 15;
/// Importance given to gaps found without the model.
const FALLBACK_GAP_IMPORTANCE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct ValidationReply {
    index: usize,
    #[serde(default)]
    validation_score: Option<f64>,
    #[serde(default)]
    corroborated_by: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ContradictionReply {
    #[serde(alias = "claim1")]
    claim_a: String,
    #[serde(default, alias = "source1")]
    source_a: String,
    #[serde(alias = "claim2")]
    claim_b: String,
    #[serde(default, alias = "source2")]
    source_b: String,
    #[serde(default)]
    nature: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct GapReply {
    description: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    suggested_queries: Vec<String>,
}

pub struct AnalysisAgent<'a> {
    ctx: &'a AgentContext,
    detector: ContradictionDetector,
}

impl<'a> AnalysisAgent<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self {
            ctx,
            detector: ContradictionDetector::new(),
        }
    }

    pub async fn analyze(
        &self,
        query: &str,
        facts: &[Fact],
        expected: &[String],
        cost: &mut CostBreakdown,
    ) -> Result<AnalysisResult> {
        if facts.is_empty() {
            return Ok(AnalysisResult::default());
        }

        let mut validated_facts = Vec::with_capacity(facts.len());
        for batch in facts.chunks(VALIDATION_BATCH) {
            validated_facts.extend(self.validate_batch(batch, cost).await?);
        }
        let contradictions = self.contradictions(facts, cost).await?;
        let knowledge_gaps = self.gaps(query, facts, expected, cost).await?;
        let source_quality = source_quality(facts);

        info!(
            facts = facts.len(),
            contradictions = contradictions.len(),
            gaps = knowledge_gaps.len(),
            source_quality,
            "Analysis finished"
        );
        Ok(AnalysisResult {
            validated_facts,
            contradictions,
            knowledge_gaps,
            source_quality,
        })
    }

    async fn validate_batch(
        &self,
        batch: &[Fact],
        cost: &mut CostBreakdown,
    ) -> Result<Vec<ValidatedFact>> {
        let prompt = format!(
            "Cross-validate these facts. For each fact, determine:\n\
1. Validation score (0-1): how well-supported is this claim?\n\
2. Corroborating sources: which other facts' sources support this one?\n\n\
Facts:\n{}\n\
Return a JSON array with one entry per fact:\n\
[{{\"index\": 1, \"validation_score\": 0.8, \"corroborated_by\": [\"source URL\"]}}]",
            numbered(batch)
        );
        let replies = degrade(
            self.ctx.ask_json::<Vec<ValidationReply>>(SYSTEM, &prompt, cost).await,
            "cross-validation",
        )?
        .flatten()
        .unwrap_or_default();

        Ok(batch
            .iter()
            .enumerate()
            .map(|(i, fact)| {
                let mut validated = ValidatedFact::unvalidated(fact);
                if let Some(reply) = replies.iter().find(|r| r.index == i + 1) {
                    if let Some(score) = reply.validation_score {
                        validated.validation_score = score.clamp(0.0, 1.0);
                    }
                    validated.corroborated_by = reply
                        .corroborated_by
                        .iter()
                        .filter(|s| **s != fact.source_url)
                        .cloned()
                        .collect();
                }
                validated
            })
            .collect())
    }

    async fn contradictions(
        &self,
        facts: &[Fact],
        cost: &mut CostBreakdown,
    ) -> Result<Vec<Contradiction>> {
        if facts.len() < 2 {
            return Ok(Vec::new());
        }
        let prompt = format!(
            "Identify any contradictions between these facts:\n\n{}\n\
Look for:\n\
- Direct contradictions (opposite claims)\n\
- Nuanced contradictions (different implications)\n\
- Scope contradictions (claims that don't match in scope)\n\n\
Return a JSON array (empty if none found):\n\
[{{\"claim1\": \"first claim\", \"source1\": \"source of first\", \"claim2\": \"contradicting claim\", \
\"source2\": \"source of second\", \"nature\": \"direct|nuanced|scope\", \"description\": \"why they conflict\"}}]",
            numbered(facts)
        );
        let reply = degrade(
            self.ctx
                .ask_json::<Vec<ContradictionReply>>(SYSTEM, &prompt, cost)
                .await,
            "contradiction detection",
        )?
        .flatten();

        match reply {
            Some(found) => Ok(found
                .into_iter()
                .filter(|c| !c.claim_a.trim().is_empty() && !c.claim_b.trim().is_empty())
                .map(|c| Contradiction {
                    claim_a: c.claim_a,
                    source_a: c.source_a,
                    claim_b: c.claim_b,
                    source_b: c.source_b,
                    nature: ContradictionNature::parse(&c.nature),
                    description: c.description,
                })
                .collect()),
            None => {
                debug!("Using keyword contradiction detector");
                Ok(self.detector.detect(facts))
            }
        }
    }

    async fn gaps(
        &self,
        query: &str,
        facts: &[Fact],
        expected: &[String],
        cost: &mut CostBreakdown,
    ) -> Result<Vec<KnowledgeGap>> {
        let gathered = facts
            .iter()
            .map(|f| format!("- {}", f.content))
            .collect::<Vec<_>>()
            .join("\n");
        let coverage = if expected.is_empty() {
            query.to_string()
        } else {
            expected.join("\n- ")
        };
        let prompt = format!(
            "Topic: {query}\n\nExpected coverage:\n- {coverage}\n\nFacts gathered:\n{gathered}\n\n\
Identify knowledge gaps: important aspects of the topic the facts do not cover.\n\
Return a JSON array (empty if coverage is complete):\n\
[{{\"description\": \"what is missing\", \"importance\": 0.8, \"suggested_queries\": [\"search query\"]}}]"
        );
        let reply = degrade(
            self.ctx.ask_json::<Vec<GapReply>>(SYSTEM, &prompt, cost).await,
            "gap identification",
        )?
        .flatten();

        Ok(match reply {
            Some(found) => found
                .into_iter()
                .filter(|g| !g.description.trim().is_empty())
                .map(|g| KnowledgeGap {
                    description: g.description,
                    importance: g
                        .importance
                        .unwrap_or(FALLBACK_GAP_IMPORTANCE)
                        .clamp(0.0, 1.0),
                    suggested_queries: g.suggested_queries,
                })
                .collect(),
            None => uncovered_questions(facts, expected),
        })
    }
}

fn numbered(facts: &[Fact]) -> String {
    facts
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. [{}] {}\n", i + 1, f.source_url, f.content))
        .collect()
}

/// Expected questions sharing no keyword with any fact.
pub fn uncovered_questions(facts: &[Fact], expected: &[String]) -> Vec<KnowledgeGap> {
    let covered: HashSet<String> = facts.iter().flat_map(|f| keywords(&f.content)).collect();
    expected
        .iter()
        .filter(|q| {
            let words = keywords(q);
            !words.is_empty() && words.is_disjoint(&covered)
        })
        .map(|q| KnowledgeGap {
            description: q.clone(),
            importance: FALLBACK_GAP_IMPORTANCE,
            suggested_queries: vec![q.clone()],
        })
        .collect()
}

/// `min(1, avg confidence + min(0.1 * distinct sources, 0.2))`; 0 without facts.
pub fn source_quality(facts: &[Fact]) -> f64 {
    if facts.is_empty() {
        return 0.0;
    }
    let avg = facts.iter().map(|f| f.confidence).sum::<f64>() / facts.len() as f64;
    let distinct = facts
        .iter()
        .map(|f| f.source_url.as_str())
        .collect::<HashSet<_>>()
        .len();
    (avg + (0.1 * distinct as f64).min(0.2)).min(1.0)
}
