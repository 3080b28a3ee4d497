//! Core type definitions for Quarry.
//!
//! Defines the data structures shared by the event log, the research
//! aggregate, and the agents: chat messages, token and cost accounting,
//! perspectives, facts with their sources, analysis results, and reports.

use serde::{Deserialize, Serialize};

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Token usage statistics from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The result of a chat call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Accumulated token and dollar cost.
///
/// Every cost-bearing event carries one of these as a delta; the session
/// total is the in-order sum of those deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl CostBreakdown {
    /// Price a usage record with per-million-token rates.
    pub fn from_usage(usage: &TokenUsage, input_per_million: f64, output_per_million: f64) -> Self {
        let input_cost_usd = usage.input_tokens as f64 * input_per_million / 1_000_000.0;
        let output_cost_usd = usage.output_tokens as f64 * output_per_million / 1_000_000.0;
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
        }
    }

    pub fn add(&mut self, other: &CostBreakdown) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.input_cost_usd += other.input_cost_usd;
        self.output_cost_usd += other.output_cost_usd;
        self.total_cost_usd += other.total_cost_usd;
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.total_cost_usd == 0.0
    }
}

/// The loop shape every worker of a session runs.
///
/// Chosen when the session is created and recorded in `research.started`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStrategy {
    /// Interviewer/expert interrogation.
    #[default]
    Storm,
    /// Think, search, observe, evaluate.
    React,
}

impl std::fmt::Display for WorkerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStrategy::Storm => write!(f, "storm"),
            WorkerStrategy::React => write!(f, "react"),
        }
    }
}

impl std::str::FromStr for WorkerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "storm" => Ok(WorkerStrategy::Storm),
            "react" => Ok(WorkerStrategy::React),
            other => Err(format!("unknown strategy '{}' (expected storm or react)", other)),
        }
    }
}

/// One named research angle explored by a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perspective {
    pub name: String,
    pub focus: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Perspective {
    pub fn new(
        name: impl Into<String>,
        focus: impl Into<String>,
        questions: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            focus: focus.into(),
            questions,
        }
    }
}

/// A web source visited by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// A single claim extracted from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub content: String,
    pub source_url: String,
    pub confidence: f64,
    pub perspective: String,
}

/// One exchange inside a worker's private conversation.
///
/// For interrogation workers this is an interviewer question and the expert
/// answer; for search-reason workers it is one think/act/observe iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    #[serde(default)]
    pub queries: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// What a worker (or the gap-filling step) found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerFindings {
    pub facts: Vec<Fact>,
    pub sources: Vec<Source>,
    pub transcript: Vec<Turn>,
    /// Steps that could not be completed, such as searches that kept failing.
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// A fact after cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFact {
    pub content: String,
    pub source_url: String,
    pub confidence: f64,
    pub perspective: String,
    pub validation_score: f64,
    #[serde(default)]
    pub corroborated_by: Vec<String>,
}

impl ValidatedFact {
    /// A fact that no validation pass has scored yet.
    pub fn unvalidated(fact: &Fact) -> Self {
        Self {
            content: fact.content.clone(),
            source_url: fact.source_url.clone(),
            confidence: fact.confidence,
            perspective: fact.perspective.clone(),
            validation_score: fact.confidence,
            corroborated_by: Vec::new(),
        }
    }
}

/// How two conflicting claims disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionNature {
    /// The claims cannot both be true.
    Direct,
    /// The claims differ in emphasis or detail.
    Nuanced,
    /// The claims apply to different contexts.
    Scope,
}

impl ContradictionNature {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "direct" => Self::Direct,
            "scope" => Self::Scope,
            _ => Self::Nuanced,
        }
    }
}

/// A pair of facts whose claims conflict on the same sub-topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub claim_a: String,
    pub source_a: String,
    pub claim_b: String,
    pub source_b: String,
    pub nature: ContradictionNature,
    #[serde(default)]
    pub description: String,
}

/// An expected question with no supporting fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub description: String,
    pub importance: f64,
    #[serde(default)]
    pub suggested_queries: Vec<String>,
}

/// Output of the analysis phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub validated_facts: Vec<ValidatedFact>,
    pub contradictions: Vec<Contradiction>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    #[serde(default)]
    pub source_quality: f64,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.validated_facts.is_empty()
            && self.contradictions.is_empty()
            && self.knowledge_gaps.is_empty()
    }
}

/// One heading of the report outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub heading: String,
    #[serde(default)]
    pub description: String,
}

/// A rendered report section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub content: String,
}

/// A numbered reference in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: usize,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// The final research report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub outline: Vec<OutlineSection>,
    pub sections: Vec<ReportSection>,
    pub full_content: String,
    pub citations: Vec<Citation>,
}
