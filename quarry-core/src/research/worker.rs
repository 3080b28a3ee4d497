//! Runs one perspective's worker with the session's strategy.

use super::conversation::ConversationSimulator;
use super::react::ReactLoop;
use super::AgentContext;
use crate::config::ResearchConfig;
use crate::error::QuarryError;
use crate::types::{CostBreakdown, Perspective, WorkerFindings, WorkerStrategy};
use tracing::{Instrument, info, info_span, warn};

/// Outcome of one worker. Cost is kept even when the worker failed.
#[derive(Debug)]
pub struct WorkerRun {
    pub perspective: String,
    pub cost: CostBreakdown,
    pub result: Result<WorkerFindings, QuarryError>,
}

impl WorkerRun {
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_cancelled())
    }
}

pub async fn run_worker(
    strategy: WorkerStrategy,
    query: String,
    perspective: Perspective,
    ctx: AgentContext,
    config: ResearchConfig,
) -> WorkerRun {
    let span = info_span!("worker", perspective = %perspective.name, %strategy);
    async move {
        let mut cost = CostBreakdown::default();
        let result = match strategy {
            WorkerStrategy::Storm => {
                ConversationSimulator::new(&ctx, &config)
                    .run(&query, &perspective, &mut cost)
                    .await
            }
            WorkerStrategy::React => {
                ReactLoop::new(&ctx, &config)
                    .run(&query, &perspective, &mut cost)
                    .await
            }
        };
        match &result {
            Ok(findings) => info!(
                facts = findings.facts.len(),
                sources = findings.sources.len(),
                cost_usd = cost.total_cost_usd,
                "Worker finished"
            ),
            Err(e) if e.is_cancelled() => info!("Worker interrupted"),
            Err(e) => warn!(error = %e, "Worker failed"),
        }
        WorkerRun {
            perspective: perspective.name.clone(),
            cost,
            result,
        }
    }
    .instrument(span)
    .await
}
