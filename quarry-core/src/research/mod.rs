//! Research agents: perspective discovery, workers, analysis and synthesis.
//!
//! Every agent runs against an [`AgentContext`]: the shared model handle, the
//! tool executor and the session's cancellation token. Agents report what
//! they spent through a `&mut CostBreakdown` so cost survives a failed run.

pub mod analysis;
pub mod contradiction;
pub mod conversation;
pub mod facts;
pub mod parse;
pub mod perspectives;
pub mod react;
pub mod synthesis;
pub mod worker;

use crate::brain::Brain;
use crate::error::{QuarryError, Result};
use crate::tools::{SEARCH_TOOL, ToolExecutor, call_tool};
use crate::types::{CostBreakdown, Message};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use analysis::AnalysisAgent;
pub use contradiction::ContradictionDetector;
pub use conversation::ConversationSimulator;
pub use perspectives::{
    Discovery, PerspectiveDiscoverer, PerspectiveSource, SurveyDiscovery, baseline_perspective,
};
pub use react::ReactLoop;
pub use synthesis::{SynthesisAgent, SynthesisInput};
pub use worker::{WorkerRun, run_worker};

/// Collaborators shared by every agent of one session.
#[derive(Clone)]
pub struct AgentContext {
    pub brain: Arc<Brain>,
    pub tools: Arc<dyn ToolExecutor>,
    pub cancel: CancellationToken,
}

impl AgentContext {
    pub fn new(brain: Arc<Brain>, tools: Arc<dyn ToolExecutor>, cancel: CancellationToken) -> Self {
        Self {
            brain,
            tools,
            cancel,
        }
    }

    /// Free-text model call.
    pub async fn ask(&self, system: &str, prompt: &str, cost: &mut CostBreakdown) -> Result<String> {
        let messages = [Message::system(system), Message::user(prompt)];
        let (response, spent) = self.brain.chat(&messages, &self.cancel).await?;
        cost.add(&spent);
        Ok(response.content.trim().to_string())
    }

    /// JSON model call; `None` after a failed stricter retry.
    pub async fn ask_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
        cost: &mut CostBreakdown,
    ) -> Result<Option<T>> {
        let messages = [Message::system(system), Message::user(prompt)];
        Ok(self.brain.chat_json::<T>(&messages, &self.cancel, cost).await?)
    }

    /// Web search through the `search` tool.
    pub async fn search(&self, query: &str, count: usize) -> Result<String> {
        let args = json!({ "query": query, "count": count });
        Ok(call_tool(self.tools.as_ref(), SEARCH_TOOL, args, &self.cancel).await?)
    }
}

/// Turn a failed step with a fallback into `None`; cancellation still propagates.
pub(crate) fn degrade<T>(result: Result<T>, step: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_cancelled() => Err(QuarryError::Cancelled),
        Err(e) => {
            warn!(step, error = %e, "Step failed; using fallback");
            Ok(None)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;

    #[test]
    fn test_degrade_keeps_value() {
        assert_eq!(degrade(Ok(3), "step").unwrap(), Some(3));
    }

    #[test]
    fn test_degrade_absorbs_failure() {
        let failed: Result<u32> = Err(QuarryError::Llm(LlmError::EmptyResponse));
        assert_eq!(degrade(failed, "step").unwrap(), None);
    }

    #[test]
    fn test_degrade_propagates_cancellation() {
        let cancelled: Result<u32> = Err(QuarryError::Llm(LlmError::Cancelled));
        assert!(matches!(
            degrade(cancelled, "step"),
            Err(QuarryError::Cancelled)
        ));
    }
}
