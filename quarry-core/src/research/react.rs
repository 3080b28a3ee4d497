//! Think / act / observe / evaluate worker loop.

use super::facts::{VisitedSources, extract_facts, merge_facts};
use super::{AgentContext, degrade};
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::types::{CostBreakdown, Fact, KnowledgeGap, Perspective, Turn, WorkerFindings};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

const SYSTEM: &str = "You are a methodical web researcher.";

/// Queries run per iteration at most.
const MAX_QUERIES: usize = 5;
/// Gap-fill targets at most this many gaps.
pub const MAX_GAP_TARGETS: usize = 3;

const COVERAGE_MIN_FACTS: usize = 5;
const COVERAGE_MAX_GAPS: usize = 2;

/// Perspective name under which gap-fill facts are recorded.
pub const GAP_FILL_PERSPECTIVE: &str = "Gap Filler";

#[derive(Debug, Default, Deserialize)]
struct Evaluation {
    #[serde(default)]
    sufficient: bool,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    next_queries: Vec<String>,
}

/// Coverage is met with at least five facts and fewer than two open gaps.
pub fn coverage_met(facts: usize, open_gaps: usize) -> bool {
    facts >= COVERAGE_MIN_FACTS && open_gaps < COVERAGE_MAX_GAPS
}

pub struct ReactLoop<'a> {
    ctx: &'a AgentContext,
    config: &'a ResearchConfig,
}

impl<'a> ReactLoop<'a> {
    pub fn new(ctx: &'a AgentContext, config: &'a ResearchConfig) -> Self {
        Self { ctx, config }
    }

    pub async fn run(
        &self,
        query: &str,
        perspective: &Perspective,
        cost: &mut CostBreakdown,
    ) -> Result<WorkerFindings> {
        let queries = self.think(query, perspective, cost).await?;
        self.iterate(query, perspective, queries, cost).await
    }

    /// Follow-up research aimed at the given knowledge gaps.
    pub async fn fill_gaps(
        &self,
        query: &str,
        gaps: &[KnowledgeGap],
        cost: &mut CostBreakdown,
    ) -> Result<WorkerFindings> {
        let targets: Vec<&KnowledgeGap> = gaps.iter().take(MAX_GAP_TARGETS).collect();
        let perspective = Perspective::new(
            GAP_FILL_PERSPECTIVE,
            "Open knowledge gaps from the first research round",
            targets.iter().map(|g| g.description.clone()).collect(),
        );
        let mut seen = HashSet::new();
        let mut queries: Vec<String> = targets
            .iter()
            .flat_map(|g| g.suggested_queries.iter())
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
            .take(MAX_QUERIES)
            .collect();
        if queries.is_empty() {
            queries = perspective.questions.clone();
        }
        self.iterate(query, &perspective, queries, cost).await
    }

    async fn think(
        &self,
        query: &str,
        perspective: &Perspective,
        cost: &mut CostBreakdown,
    ) -> Result<Vec<String>> {
        let questions = if perspective.questions.is_empty() {
            query.to_string()
        } else {
            perspective.questions.join("\n- ")
        };
        let prompt = format!(
            "Plan 3-5 web searches to research: {query}\n\n\
Perspective: {}\nFocus: {}\nKey questions:\n- {questions}\n\n\
Return JSON array of search queries: [\"query1\", \"query2\", ...]",
            perspective.name, perspective.focus
        );
        let planned = degrade(
            self.ctx.ask_json::<Vec<String>>(SYSTEM, &prompt, cost).await,
            "query planning",
        )?
        .flatten()
        .unwrap_or_default();
        let queries = clean_queries(planned, &HashSet::new());
        if !queries.is_empty() {
            return Ok(queries);
        }
        if perspective.questions.is_empty() {
            Ok(vec![query.to_string()])
        } else {
            Ok(perspective.questions.iter().take(3).cloned().collect())
        }
    }

    async fn iterate(
        &self,
        query: &str,
        perspective: &Perspective,
        mut queries: Vec<String>,
        cost: &mut CostBreakdown,
    ) -> Result<WorkerFindings> {
        let mut visited = VisitedSources::new();
        let mut facts: Vec<Fact> = Vec::new();
        let mut transcript = Vec::new();
        let mut failures = Vec::new();
        let mut open_gaps: Vec<String> = Vec::new();
        let mut executed: HashSet<String> = HashSet::new();
        let ceiling = self.config.max_iterations.max(1);

        for iteration in 1..=ceiling {
            let mut results = Vec::new();
            let mut urls = Vec::new();
            for q in &queries {
                executed.insert(q.to_lowercase());
                match self.ctx.search(q, self.config.search_results).await {
                    Ok(text) => {
                        urls.extend(visited.record_search(&text));
                        results.push(text);
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!(perspective = %perspective.name, query = %q, error = %e, "Search failed");
                        failures.push(format!("search \"{}\" failed: {}", q, e));
                    }
                }
            }

            let found = degrade(
                extract_facts(
                    self.ctx,
                    query,
                    &perspective.name,
                    &results.join("\n---\n"),
                    &visited,
                    cost,
                )
                .await,
                "fact extraction",
            )?
            .unwrap_or_default();
            let before = facts.len();
            merge_facts(&mut facts, found);
            let question = if iteration == 1 {
                perspective.focus.clone()
            } else {
                open_gaps.join("; ")
            };
            transcript.push(Turn {
                question,
                answer: format!(
                    "Found {} new facts from {} new sources.",
                    facts.len() - before,
                    urls.len()
                ),
                queries: std::mem::take(&mut queries),
                urls,
            });

            if iteration == ceiling {
                break;
            }

            let Some(evaluation) = degrade(
                self.evaluate(query, perspective, &facts, cost).await,
                "coverage evaluation",
            )?
            .flatten() else {
                break;
            };
            open_gaps = evaluation.gaps;
            if evaluation.sufficient || coverage_met(facts.len(), open_gaps.len()) {
                debug!(perspective = %perspective.name, iteration, facts = facts.len(), "Coverage sufficient");
                break;
            }
            queries = clean_queries(evaluation.next_queries, &executed);
            if queries.is_empty() {
                break;
            }
        }

        let summary = format!(
            "{} facts from {} sources after {} iterations.",
            facts.len(),
            visited.len(),
            transcript.len()
        );
        let mut gaps = failures;
        gaps.extend(open_gaps);
        Ok(WorkerFindings {
            facts,
            sources: visited.into_sources(),
            transcript,
            gaps,
            summary,
        })
    }

    async fn evaluate(
        &self,
        query: &str,
        perspective: &Perspective,
        facts: &[Fact],
        cost: &mut CostBreakdown,
    ) -> Result<Option<Evaluation>> {
        let gathered = if facts.is_empty() {
            "(none yet)".to_string()
        } else {
            facts
                .iter()
                .map(|f| format!("- {}", f.content))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = format!(
            "Research goal: {query}\nPerspective: {}\n\nQuestions to answer:\n- {}\n\n\
Facts gathered:\n{gathered}\n\n\
Judge whether the facts gathered are enough to answer the questions.\n\
Return JSON: {{\"sufficient\": true|false, \"gaps\": [\"unanswered question\"], \"next_queries\": [\"search query\"]}}",
            perspective.name,
            perspective.questions.join("\n- ")
        );
        self.ctx.ask_json::<Evaluation>(SYSTEM, &prompt, cost).await
    }
}

fn clean_queries(raw: Vec<String>, executed: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| {
            !q.is_empty() && !executed.contains(&q.to_lowercase()) && seen.insert(q.to_lowercase())
        })
        .take(MAX_QUERIES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::testing::{SEARCH_TEXT, context, context_shared, prompt};
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::tools::MockToolExecutor;
    use std::sync::Arc;

    fn perspective() -> Perspective {
        Perspective::new(
            "Systems Programmer",
            "Memory safety",
            vec!["How does ownership work?".into()],
        )
    }

    const FACTS: &str = r#"[
        {"content": "Each value in Rust has an owner", "source": "https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html", "confidence": 0.95},
        {"content": "Tokio is an async runtime", "source": "https://tokio.rs/tokio/tutorial/", "confidence": 0.9}
    ]"#;

    #[test]
    fn test_coverage_met() {
        assert!(coverage_met(5, 1));
        assert!(!coverage_met(4, 0));
        assert!(!coverage_met(8, 2));
    }

    #[test]
    fn test_clean_queries_skips_executed_and_duplicates() {
        let executed: HashSet<String> = ["rust ownership".to_string()].into_iter().collect();
        let cleaned = clean_queries(
            vec![
                "Rust ownership".into(),
                " borrowing ".into(),
                "BORROWING".into(),
                "".into(),
            ],
            &executed,
        );
        assert_eq!(cleaned, vec!["borrowing"]);
    }

    #[tokio::test]
    async fn test_react_stops_when_sufficient() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(
            MockLlmProvider::with_responder(|messages| {
                let p = prompt(messages);
                if p.contains("Plan 3-5 web searches") {
                    Ok(r#"["rust ownership", "borrow checker"]"#.into())
                } else if p.contains("extract the key factual claims") {
                    Ok(FACTS.into())
                } else if p.contains("Judge whether the facts gathered") {
                    Ok(r#"{"sufficient": true, "gaps": [], "next_queries": []}"#.into())
                } else {
                    Ok("unexpected".into())
                }
            }),
            tools.clone(),
        );
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();
        let findings = ReactLoop::new(&ctx, &config)
            .run("rust", &perspective(), &mut cost)
            .await
            .unwrap();

        assert_eq!(findings.transcript.len(), 1);
        assert_eq!(findings.facts.len(), 2);
        assert_eq!(
            findings.facts[1].source_url,
            "https://tokio.rs/tokio/tutorial"
        );
        assert_eq!(findings.sources.len(), 2);
        assert_eq!(tools.calls().len(), 2);
        assert_eq!(cost.total_tokens, 3 * 150);
    }

    #[tokio::test]
    async fn test_react_follows_next_queries_until_ceiling() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(
            MockLlmProvider::with_responder(|messages| {
                let p = prompt(messages);
                if p.contains("Plan 3-5 web searches") {
                    Ok(r#"["first"]"#.into())
                } else if p.contains("extract the key factual claims") {
                    Ok("[]".into())
                } else if p.contains("Judge whether the facts gathered") {
                    if p.contains("(none yet)") {
                        Ok(r#"{"sufficient": false, "gaps": ["lifetimes"], "next_queries": ["second", "first"]}"#.into())
                    } else {
                        Ok("{}".into())
                    }
                } else {
                    Ok("unexpected".into())
                }
            }),
            tools.clone(),
        );
        let config = ResearchConfig {
            max_iterations: 2,
            ..ResearchConfig::default()
        };
        let mut cost = CostBreakdown::default();
        let findings = ReactLoop::new(&ctx, &config)
            .run("rust", &perspective(), &mut cost)
            .await
            .unwrap();

        assert_eq!(findings.transcript.len(), 2);
        assert_eq!(findings.transcript[1].queries, vec!["second"]);
        assert_eq!(findings.transcript[1].question, "lifetimes");
        assert_eq!(findings.gaps, vec!["lifetimes"]);
        let queried: Vec<String> = tools
            .calls()
            .iter()
            .map(|(_, args)| args["query"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(queried, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_react_unparseable_plan_falls_back_to_questions() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(MockLlmProvider::with_responder(|_| Ok("nope".into())), tools.clone());
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();
        let findings = ReactLoop::new(&ctx, &config)
            .run("rust", &perspective(), &mut cost)
            .await
            .unwrap();
        assert_eq!(tools.calls()[0].1["query"], "How does ownership work?");
        // Unparseable evaluation ends the loop after one iteration.
        assert_eq!(findings.transcript.len(), 1);
        assert!(findings.facts.is_empty());
    }

    #[tokio::test]
    async fn test_react_failing_tools_become_gaps() {
        let ctx = context(
            MockLlmProvider::with_responder(|messages| {
                if prompt(messages).contains("Plan 3-5 web searches") {
                    Ok(r#"["a", "b"]"#.into())
                } else {
                    Ok(r#"{"sufficient": true}"#.into())
                }
            }),
            MockToolExecutor::failing(),
        );
        let config = ResearchConfig::default();
        let mut cost = CostBreakdown::default();
        let findings = ReactLoop::new(&ctx, &config)
            .run("rust", &perspective(), &mut cost)
            .await
            .unwrap();
        assert_eq!(findings.gaps.len(), 2);
        assert!(findings.gaps[0].contains("search \"a\" failed"));
        assert!(findings.sources.is_empty());
    }

    #[tokio::test]
    async fn test_fill_gaps_uses_suggested_queries() {
        let tools = Arc::new(MockToolExecutor::with_text(SEARCH_TEXT));
        let ctx = context_shared(
            MockLlmProvider::with_responder(|messages| {
                if prompt(messages).contains("extract the key factual claims") {
                    Ok(FACTS.into())
                } else {
                    Ok(r#"{"sufficient": true}"#.into())
                }
            }),
            tools.clone(),
        );
        let config = ResearchConfig::default();
        let gaps = vec![KnowledgeGap {
            description: "Pricing is unknown".into(),
            importance: 0.9,
            suggested_queries: vec!["tokio pricing".into(), "Tokio Pricing".into()],
        }];
        let mut cost = CostBreakdown::default();
        let findings = ReactLoop::new(&ctx, &config)
            .fill_gaps("tokio", &gaps, &mut cost)
            .await
            .unwrap();
        assert_eq!(tools.calls().len(), 1);
        assert_eq!(tools.calls()[0].1["query"], "tokio pricing");
        assert!(findings.facts.iter().all(|f| f.perspective == GAP_FILL_PERSPECTIVE));
        assert_eq!(findings.facts.len(), 2);
    }
}
