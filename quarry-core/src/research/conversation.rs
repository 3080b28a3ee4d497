//! Interrogation-style worker loop.
//!
//! An interviewer persona questions a topic expert. The expert turns each
//! question into a few search queries, runs them and answers citing
//! `[Source: URL]`. The dialogue ends when the interviewer thanks the expert
//! or the turn limit is reached; facts are then extracted from the whole
//! transcript.

use super::facts::{VisitedSources, extract_facts};
use super::parse::truncate_chars;
use super::{AgentContext, degrade};
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::types::{CostBreakdown, Perspective, Turn, WorkerFindings};
use tracing::{debug, warn};

const INTERVIEWER_SYSTEM: &str =
    "You are a diligent researcher interviewing a topic expert to write a report.";
const EXPERT_SYSTEM: &str =
    "You are a topic expert who answers strictly from the search results you are given.";

/// Phrases with which the interviewer ends the conversation.
pub const CLOSING_PHRASES: &[&str] = &[
    "Thank you so much for your help!",
    "Thank you for your help",
    "that covers everything",
];

/// Expert answer used when no search returned anything.
pub const NO_RESULTS_ANSWER: &str = "I couldn't find relevant information to answer this question.";

const MAX_QUERIES_PER_TURN: usize = 3;
const SUMMARY_CHARS: usize = 500;

/// Whether an interviewer message ends the conversation.
pub fn is_closing(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CLOSING_PHRASES
        .iter()
        .any(|phrase| lowered.contains(&phrase.to_lowercase()))
}

/// Runs one perspective's interviewer/expert dialogue.
pub struct ConversationSimulator<'a> {
    ctx: &'a AgentContext,
    config: &'a ResearchConfig,
}

impl<'a> ConversationSimulator<'a> {
    pub fn new(ctx: &'a AgentContext, config: &'a ResearchConfig) -> Self {
        Self { ctx, config }
    }

    pub async fn run(
        &self,
        query: &str,
        perspective: &Perspective,
        cost: &mut CostBreakdown,
    ) -> Result<WorkerFindings> {
        let mut transcript: Vec<Turn> = Vec::new();
        let mut visited = VisitedSources::new();
        let mut gaps = Vec::new();

        for turn in 0..self.config.max_turns {
            let question = self.ask(query, perspective, &transcript, cost).await?;
            if question.is_empty() || is_closing(&question) {
                debug!(perspective = %perspective.name, turn, "Interviewer closed the conversation");
                break;
            }

            let queries = self.queries_for(query, &question, cost).await?;
            let mut results = Vec::new();
            let mut urls = Vec::new();
            for q in &queries {
                match self.ctx.search(q, self.config.search_results).await {
                    Ok(text) => {
                        urls.extend(visited.record_search(&text));
                        results.push(text);
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!(perspective = %perspective.name, query = %q, error = %e, "Search failed");
                        gaps.push(format!("search \"{}\" failed: {}", q, e));
                    }
                }
            }

            let answer = self.answer(query, &question, &results, cost).await?;
            transcript.push(Turn {
                question,
                queries,
                answer,
                urls,
            });
        }

        let material = transcript
            .iter()
            .map(|t| format!("Q: {}\nA: {}", t.question, t.answer))
            .collect::<Vec<_>>()
            .join("\n\n");
        let facts = degrade(
            extract_facts(self.ctx, query, &perspective.name, &material, &visited, cost).await,
            "fact extraction",
        )?
        .unwrap_or_default();

        let summary = transcript
            .last()
            .map(|t| truncate_chars(&t.answer, SUMMARY_CHARS))
            .unwrap_or_default();

        Ok(WorkerFindings {
            facts,
            sources: visited.into_sources(),
            transcript,
            gaps,
            summary,
        })
    }

    /// Interviewer question; sees only this perspective's own history.
    async fn ask(
        &self,
        query: &str,
        perspective: &Perspective,
        history: &[Turn],
        cost: &mut CostBreakdown,
    ) -> Result<String> {
        let prompt = if history.is_empty() {
            let areas = if perspective.questions.is_empty() {
                perspective.focus.clone()
            } else {
                perspective.questions.join("\n- ")
            };
            format!(
                "You are a {name} researching \"{query}\".\nYour focus: {focus}\n\n\
You are starting a conversation with a research expert to gather information for a comprehensive report.\n\n\
Key areas you want to investigate:\n- {areas}\n\n\
Ask one specific, focused question from your perspective.\nYour question:",
                name = perspective.name,
                focus = perspective.focus,
            )
        } else {
            let so_far = history
                .iter()
                .map(|t| format!("You asked: {}\nExpert answered: {}", t.question, t.answer))
                .collect::<Vec<_>>()
                .join("\n\n");
            format!(
                "You are a {name} researching \"{query}\".\nYour focus: {focus}\n\n\
Conversation so far:\n{so_far}\n\n\
Ask a follow-up question about aspects not yet covered or that need clarification.\n\
If you have gathered enough information from this perspective, say:\n\
\"Thank you so much for your help!\"\n\n\
Your next question or thank you message:",
                name = perspective.name,
                focus = perspective.focus,
            )
        };
        self.ctx.ask(INTERVIEWER_SYSTEM, &prompt, cost).await
    }

    async fn queries_for(
        &self,
        query: &str,
        question: &str,
        cost: &mut CostBreakdown,
    ) -> Result<Vec<String>> {
        let prompt = format!(
            "Topic: {query}\nQuestion: {question}\n\n\
Generate 1-3 search queries to find information that answers this question.\n\
Focus on factual, verifiable information from reliable sources.\n\n\
Return a JSON array: [\"query1\", \"query2\"]"
        );
        let queries: Vec<String> = degrade(
            self.ctx.ask_json::<Vec<String>>(EXPERT_SYSTEM, &prompt, cost).await,
            "query generation",
        )?
        .flatten()
        .unwrap_or_default()
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(MAX_QUERIES_PER_TURN)
        .collect();

        if queries.is_empty() {
            return Ok(vec![question.to_string()]);
        }
        Ok(queries)
    }

    async fn answer(
        &self,
        query: &str,
        question: &str,
        results: &[String],
        cost: &mut CostBreakdown,
    ) -> Result<String> {
        if results.is_empty() {
            return Ok(NO_RESULTS_ANSWER.to_string());
        }
        let prompt = format!(
            "Topic: {query}\nQuestion: {question}\n\nSearch Results:\n{}\n\n\
Answer using ONLY information from the search results.\n\
Cite sources inline using the [Source: URL] format.\n\
If the results do not contain relevant information, say so honestly.\n\nYour answer:",
            results.join("\n---\n")
        );
        self.ctx.ask(EXPERT_SYSTEM, &prompt, cost).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{SEARCH_TEXT, context, context_shared, prompt};
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use crate::tools::MockToolExecutor;
    use crate::types::Message;
    use std::sync::Arc;

    fn perspective() -> Perspective {
        Perspective::new(
            "Runtime Engineer",
            "Scheduler internals",
            vec!["How are tasks scheduled?".into()],
        )
    }

    fn scripted(messages: &[Message]) -> std::result::Result<String, LlmError> {
        let p = prompt(messages);
        if p.contains("Conversation so far") {
            Ok("Thank you so much for your help!".into())
        } else if p.contains("Your question:") {
            Ok("How does the tokio scheduler work?".into())
        } else if p.contains("Generate 1-3 search queries") {
            Ok(r#"["tokio scheduler", "work stealing"]"#.into())
        } else if p.contains("Search Results:") {
            Ok("It uses work stealing [Source: https://tokio.rs/tokio/tutorial]".into())
        } else if p.contains("extract the key factual claims") {
            Ok(r#"[
                {"content": "Tokio uses a work-stealing scheduler", "source": "https://tokio.rs/tokio/tutorial", "confidence": 0.9},
                {"content": "Unsourced claim", "source": "unknown", "confidence": 0.9}
            ]"#
            .into())
        } else {
            Ok("unexpected".into())
        }
    }

    #[test]
    fn test_closing_phrases() {
        assert!(is_closing("Great. Thank you so much for your help!"));
        assert!(is_closing("I think THAT COVERS EVERYTHING."));
        assert!(!is_closing("What about memory usage?"));
    }

    #[tokio::test]
    async fn test_conversation_runs_until_closing_phrase() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(MockLlmProvider::with_responder(scripted), tools.clone());
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();

        let findings = ConversationSimulator::new(&ctx, &config)
            .run("tokio", &perspective(), &mut cost)
            .await
            .unwrap();

        assert_eq!(findings.transcript.len(), 1);
        assert_eq!(findings.transcript[0].queries, vec!["tokio scheduler", "work stealing"]);
        assert_eq!(findings.transcript[0].urls.len(), 2);
        assert_eq!(findings.sources.len(), 2);
        assert_eq!(findings.facts.len(), 1);
        assert_eq!(findings.facts[0].perspective, "Runtime Engineer");
        assert!(findings.gaps.is_empty());
        assert_eq!(tools.calls().len(), 2);
        assert_eq!(tools.calls()[0].1["count"], 5);
        // ask, queries, answer, closing ask, extraction
        assert_eq!(cost.total_tokens, 5 * 150);
    }

    #[tokio::test]
    async fn test_conversation_respects_turn_limit() {
        let ctx = context(
            MockLlmProvider::with_responder(|messages| {
                let p = prompt(messages);
                if p.contains("Generate 1-3 search queries") {
                    Ok(r#"["q"]"#.into())
                } else if p.contains("extract the key factual claims") {
                    Ok("[]".into())
                } else {
                    Ok("Another question?".into())
                }
            }),
            MockToolExecutor::with_text(SEARCH_TEXT),
        );
        let config = ResearchConfig {
            max_turns: 2,
            ..ResearchConfig::default()
        };
        let mut cost = CostBreakdown::default();
        let findings = ConversationSimulator::new(&ctx, &config)
            .run("tokio", &perspective(), &mut cost)
            .await
            .unwrap();
        assert_eq!(findings.transcript.len(), 2);
        // Second turn repeats the same URLs, so they are only recorded once.
        assert_eq!(findings.sources.len(), 2);
        assert!(findings.transcript[1].urls.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_with_failing_tools_records_gaps() {
        let ctx = context(
            MockLlmProvider::with_responder(scripted),
            MockToolExecutor::failing(),
        );
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();
        let findings = ConversationSimulator::new(&ctx, &config)
            .run("tokio", &perspective(), &mut cost)
            .await
            .unwrap();
        assert_eq!(findings.transcript[0].answer, NO_RESULTS_ANSWER);
        assert!(findings.facts.is_empty());
        assert!(findings.sources.is_empty());
        assert_eq!(findings.gaps.len(), 2);
    }

    #[tokio::test]
    async fn test_conversation_query_fallback_uses_question() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(
            MockLlmProvider::with_responder(|messages| {
                let p = prompt(messages);
                if p.contains("Your question:") {
                    Ok("What is tokio?".into())
                } else if p.contains("Conversation so far") {
                    Ok("that covers everything".into())
                } else if p.contains("Search Results:") {
                    Ok("answer".into())
                } else {
                    Ok("no json".into())
                }
            }),
            tools.clone(),
        );
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();
        let findings = ConversationSimulator::new(&ctx, &config)
            .run("tokio", &perspective(), &mut cost)
            .await
            .unwrap();
        assert_eq!(findings.transcript[0].queries, vec!["What is tokio?"]);
        assert_eq!(tools.calls()[0].1["query"], "What is tokio?");
    }
}
