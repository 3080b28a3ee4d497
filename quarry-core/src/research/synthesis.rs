//! Report writing: outline, numbered citations, section prose, summary and
//! the compiled markdown document.

use super::facts::normalize_url;
use super::parse::truncate_chars;
use super::{AgentContext, degrade};
use crate::error::Result;
use crate::types::{
    AnalysisResult, Citation, CostBreakdown, Fact, OutlineSection, Perspective, Report,
    ReportSection, Source, Turn,
};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::{debug, info};

const SYSTEM: &str = "You are an expert research writer producing well-sourced reports.";

/// Section text used when the model could not write a section.
pub const SECTION_FALLBACK: &str = "Content could not be generated.";
const SUMMARY_FALLBACK_CHARS: usize = 500;
const MAX_SECTIONS: usize = 6;
const MAX_FACTS_PER_SECTION: usize = 40;
const TRANSCRIPT_EXCERPT_CHARS: usize = 600;

static NUMBER_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").ok());
static URL_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(?:Source:\s*)?(https?://[^\]\s]+)\]").ok());

/// Everything the writer works from.
#[derive(Debug, Clone, Default)]
pub struct SynthesisInput {
    pub query: String,
    pub perspectives: Vec<Perspective>,
    /// Conversation turns per perspective name.
    pub transcripts: Vec<(String, Vec<Turn>)>,
    pub facts: Vec<Fact>,
    pub sources: Vec<Source>,
    pub analysis: AnalysisResult,
}

/// Outline entries come back as plain headings or as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutlineReply {
    Heading(String),
    Section {
        heading: String,
        #[serde(default)]
        description: String,
    },
}

impl From<OutlineReply> for OutlineSection {
    fn from(reply: OutlineReply) -> Self {
        match reply {
            OutlineReply::Heading(heading) => OutlineSection {
                heading,
                description: String::new(),
            },
            OutlineReply::Section {
                heading,
                description,
            } => OutlineSection {
                heading,
                description,
            },
        }
    }
}

/// Used when neither the draft nor the refined outline is usable.
pub fn default_outline() -> Vec<OutlineSection> {
    [
        "Introduction",
        "Key Findings",
        "Analysis",
        "Implications",
        "Conclusion",
    ]
    .into_iter()
    .map(|heading| OutlineSection {
        heading: heading.to_string(),
        description: String::new(),
    })
    .collect()
}

pub struct SynthesisAgent<'a> {
    ctx: &'a AgentContext,
}

impl<'a> SynthesisAgent<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self { ctx }
    }

    pub async fn synthesize(&self, input: &SynthesisInput, cost: &mut CostBreakdown) -> Result<Report> {
        let draft = self.draft_outline(input, cost).await?;
        let outline = match self.refine_outline(input, draft.as_deref(), cost).await? {
            Some(refined) => refined,
            None => draft.unwrap_or_else(default_outline),
        };
        debug!(sections = outline.len(), "Outline ready");

        let citations = build_citations(&input.facts, &input.sources);
        let mut sections = Vec::with_capacity(outline.len());
        for section in &outline {
            let content = self
                .write_section(input, section, &citations, cost)
                .await?
                .unwrap_or_else(|| SECTION_FALLBACK.to_string());
            sections.push(ReportSection {
                heading: section.heading.clone(),
                content,
            });
        }

        let summary = match self.summarize(input, &sections, &citations, cost).await? {
            Some(summary) => summary,
            None => sections
                .first()
                .map(|s| truncate_chars(&s.content, SUMMARY_FALLBACK_CHARS))
                .unwrap_or_default(),
        };

        let title = input.query.trim().to_string();
        let full_content = compile_markdown(&title, &summary, &sections, &input.analysis, &citations);
        info!(
            sections = sections.len(),
            citations = citations.len(),
            "Report compiled"
        );
        Ok(Report {
            title,
            summary,
            outline,
            sections,
            full_content,
            citations,
        })
    }

    async fn draft_outline(
        &self,
        input: &SynthesisInput,
        cost: &mut CostBreakdown,
    ) -> Result<Option<Vec<OutlineSection>>> {
        let perspectives = input
            .perspectives
            .iter()
            .map(|p| format!("- {}: {}", p.name, p.focus))
            .collect::<Vec<_>>()
            .join("\n");
        let conversations = input
            .transcripts
            .iter()
            .map(|(name, turns)| {
                let turns = turns
                    .iter()
                    .map(|t| {
                        format!(
                            "Q: {}\nA: {}",
                            t.question,
                            truncate_chars(&t.answer, TRANSCRIPT_EXCERPT_CHARS)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("### {}\n{}", name, turns)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Create a draft outline for a comprehensive research report on: \"{}\"\n\n\
Perspectives covered:\n{perspectives}\n\n\
Expert conversations:\n{conversations}\n\n\
Generate a logical outline with 4-6 main sections.\n\
Return a JSON array: [{{\"heading\": \"Section\", \"description\": \"what it covers\"}}]",
            input.query
        );
        let reply = degrade(
            self.ctx
                .ask_json::<Vec<OutlineReply>>(SYSTEM, &prompt, cost)
                .await,
            "outline draft",
        )?
        .flatten();
        Ok(reply.and_then(clean_outline))
    }

    async fn refine_outline(
        &self,
        input: &SynthesisInput,
        draft: Option<&[OutlineSection]>,
        cost: &mut CostBreakdown,
    ) -> Result<Option<Vec<OutlineSection>>> {
        let current = draft.map(<[OutlineSection]>::to_vec).unwrap_or_else(default_outline);
        let current = current
            .iter()
            .map(|s| format!("- {}", s.heading))
            .collect::<Vec<_>>()
            .join("\n");
        let analysis = &input.analysis;
        let contradictions = analysis
            .contradictions
            .iter()
            .map(|c| format!("- \"{}\" vs \"{}\"", c.claim_a, c.claim_b))
            .collect::<Vec<_>>()
            .join("\n");
        let gaps = analysis
            .knowledge_gaps
            .iter()
            .map(|g| format!("- {}", g.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Improve an outline for a research report on: \"{}\"\n\n\
Current draft outline:\n{current}\n\n\
Validated facts: {}\nContradictions found:\n{contradictions}\nOpen knowledge gaps:\n{gaps}\n\n\
Improve the outline to cover important topics discovered, group conflicting claims,\n\
and keep 4-6 sections in a logical order.\n\
Return a JSON array: [{{\"heading\": \"Section\", \"description\": \"what it covers\"}}]",
            input.query,
            analysis.validated_facts.len().max(input.facts.len()),
        );
        let reply = degrade(
            self.ctx
                .ask_json::<Vec<OutlineReply>>(SYSTEM, &prompt, cost)
                .await,
            "outline refinement",
        )?
        .flatten();
        Ok(reply.and_then(clean_outline))
    }

    async fn write_section(
        &self,
        input: &SynthesisInput,
        section: &OutlineSection,
        citations: &[Citation],
        cost: &mut CostBreakdown,
    ) -> Result<Option<String>> {
        let numbers = citation_numbers(citations);
        let mut ranked: Vec<&Fact> = input.facts.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let available = ranked
            .iter()
            .take(MAX_FACTS_PER_SECTION)
            .filter_map(|f| {
                numbers
                    .get(&normalize_url(&f.source_url))
                    .map(|n| format!("[{}] {}", n, f.content))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let available = if available.is_empty() {
            "(no sourced facts available)".to_string()
        } else {
            available
        };
        let prompt = format!(
            "Write the \"{}\" section of a research report on \"{}\".\n\
Section scope: {}\n\n\
Available facts:\n{available}\n\n\
Write 2-4 paragraphs. Cite facts inline with their bracketed number, e.g. [1].\n\
Only use citation numbers listed above. Do not include the section heading.",
            section.heading, input.query, section.description
        );
        let text = degrade(
            self.ctx.ask(SYSTEM, &prompt, cost).await,
            "section writing",
        )?;
        Ok(text
            .map(|t| strip_invalid_citations(&t, citations))
            .filter(|t| !t.trim().is_empty()))
    }

    async fn summarize(
        &self,
        input: &SynthesisInput,
        sections: &[ReportSection],
        citations: &[Citation],
        cost: &mut CostBreakdown,
    ) -> Result<Option<String>> {
        let body = sections
            .iter()
            .map(|s| format!("## {}\n{}", s.heading, truncate_chars(&s.content, 800)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Write an executive summary (one paragraph, at most 150 words) of this research report on \"{}\".\n\n{body}",
            input.query
        );
        let text = degrade(self.ctx.ask(SYSTEM, &prompt, cost).await, "summary")?;
        Ok(text
            .map(|t| strip_invalid_citations(&t, citations))
            .filter(|t| !t.trim().is_empty()))
    }
}

fn clean_outline(reply: Vec<OutlineReply>) -> Option<Vec<OutlineSection>> {
    let outline: Vec<OutlineSection> = reply
        .into_iter()
        .map(OutlineSection::from)
        .filter(|s| !s.heading.trim().is_empty())
        .take(MAX_SECTIONS)
        .collect();
    if outline.is_empty() { None } else { Some(outline) }
}

/// Number the distinct fact sources in first-seen order.
pub fn build_citations(facts: &[Fact], sources: &[Source]) -> Vec<Citation> {
    let titles: HashMap<String, &str> = sources
        .iter()
        .map(|s| (normalize_url(&s.url), s.title.as_str()))
        .collect();
    let mut seen = HashMap::new();
    let mut citations = Vec::new();
    for fact in facts {
        let key = normalize_url(&fact.source_url);
        if key.is_empty() || seen.contains_key(&key) {
            continue;
        }
        let id = citations.len() + 1;
        seen.insert(key.clone(), id);
        citations.push(Citation {
            id,
            url: fact.source_url.clone(),
            title: titles.get(&key).map(|t| t.to_string()).unwrap_or_default(),
        });
    }
    citations
}

fn citation_numbers(citations: &[Citation]) -> HashMap<String, usize> {
    citations
        .iter()
        .map(|c| (normalize_url(&c.url), c.id))
        .collect()
}

/// Rewrite URL citations to their numbers and drop markers with no matching source.
pub fn strip_invalid_citations(text: &str, citations: &[Citation]) -> String {
    let numbers = citation_numbers(citations);
    let text = match URL_MARKER.as_ref() {
        Some(re) => re
            .replace_all(text, |caps: &Captures| {
                numbers
                    .get(&normalize_url(&caps[1]))
                    .map(|n| format!("[{}]", n))
                    .unwrap_or_default()
            })
            .into_owned(),
        None => text.to_string(),
    };
    match NUMBER_MARKER.as_ref() {
        Some(re) => re
            .replace_all(&text, |caps: &Captures| {
                match caps[1].parse::<usize>() {
                    Ok(n) if (1..=citations.len()).contains(&n) => caps[0].to_string(),
                    _ => String::new(),
                }
            })
            .into_owned(),
        None => text,
    }
}

/// Render the report as one markdown document.
pub fn compile_markdown(
    title: &str,
    summary: &str,
    sections: &[ReportSection],
    analysis: &AnalysisResult,
    citations: &[Citation],
) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "# {}\n", title);
    let _ = writeln!(doc, "## Executive Summary\n\n{}\n", summary);
    for section in sections {
        let _ = writeln!(doc, "## {}\n\n{}\n", section.heading, section.content);
    }
    if !analysis.contradictions.is_empty() {
        doc.push_str("## Notes on Conflicting Information\n\n");
        for c in &analysis.contradictions {
            let nature = serde_json::to_value(c.nature)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let _ = writeln!(doc, "- **{}**: \"{}\" vs \"{}\"", nature, c.claim_a, c.claim_b);
        }
        doc.push('\n');
    }
    doc.push_str("## Sources\n\n");
    for c in citations {
        if c.title.is_empty() {
            let _ = writeln!(doc, "{}. {}", c.id, c.url);
        } else {
            let _ = writeln!(doc, "{}. [{}]({})", c.id, c.title, c.url);
        }
    }
    doc
}
