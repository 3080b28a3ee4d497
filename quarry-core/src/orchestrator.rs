//! Drives a research session through its phases.
//!
//! The orchestrator is the only writer of a session's log. Every transition
//! goes through [`Orchestrator::record`]: the event is checked against the
//! aggregate, appended durably, committed to the in-memory state through the
//! same fold, and then published on the bus. Resuming a session replays its
//! log and re-enters at the phase its status implies.

use crate::aggregate::{ResearchState, ResearchStatus, load_from_events};
use crate::brain::Brain;
use crate::bus::EventBus;
use crate::config::ResearchConfig;
use crate::error::{QuarryError, Result};
use crate::events::*;
use crate::research::react::{MAX_GAP_TARGETS, ReactLoop};
use crate::research::{
    AgentContext, AnalysisAgent, PerspectiveSource, SurveyDiscovery, SynthesisAgent,
    SynthesisInput, WorkerRun, run_worker,
};
use crate::session::{new_session_id, next_version_id};
use crate::store::EventStore;
use crate::tools::ToolExecutor;
use crate::types::{CostBreakdown, KnowledgeGap, Perspective, WorkerStrategy};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to research and how.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub query: String,
    pub strategy: WorkerStrategy,
    pub settings: SessionSettings,
}

impl ResearchRequest {
    /// A request using the configured strategy and run settings.
    pub fn from_config(query: impl Into<String>, config: &ResearchConfig) -> Self {
        Self {
            query: query.into(),
            strategy: config.strategy,
            settings: config.session_settings(),
        }
    }

    pub fn with_strategy(mut self, strategy: WorkerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.timeout_secs = secs;
        self
    }
}

/// Runs research sessions against an event store.
pub struct Orchestrator {
    store: Arc<dyn EventStore>,
    bus: EventBus,
    brain: Arc<Brain>,
    tools: Arc<dyn ToolExecutor>,
    discovery: Arc<dyn PerspectiveSource>,
    config: ResearchConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EventStore>,
        brain: Arc<Brain>,
        tools: Arc<dyn ToolExecutor>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            store,
            bus: EventBus::default(),
            brain,
            tools,
            discovery: Arc::new(SurveyDiscovery),
            config,
        }
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Replace how perspectives are found for new sessions.
    pub fn with_perspective_source(mut self, source: Arc<dyn PerspectiveSource>) -> Self {
        self.discovery = source;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start a new session and run it to a terminal or cancelled state.
    pub async fn start(
        &self,
        request: ResearchRequest,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        self.begin(new_session_id(Utc::now()), request, None, cancel)
            .await
    }

    /// Start a follow-up session chained to `parent_id`.
    pub async fn follow_up(
        &self,
        parent_id: &str,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        let parent = self.load(parent_id).await?;
        let existing = self.store.list_session_ids().await?;
        let id = next_version_id(parent_id, &existing);
        let request = ResearchRequest {
            query: query.to_string(),
            strategy: parent.strategy,
            settings: parent.settings.clone(),
        };
        self.begin(id, request, Some(parent.id), cancel).await
    }

    /// Continue a session from where its log ends.
    ///
    /// Complete and failed sessions are returned unchanged.
    pub async fn resume(&self, session_id: &str, cancel: CancellationToken) -> Result<ResearchState> {
        let mut state = self.load(session_id).await?;
        match state.status {
            ResearchStatus::Complete | ResearchStatus::Failed => {
                debug!(session_id, status = %state.status, "Nothing to resume");
                return Ok(state);
            }
            ResearchStatus::Pending => {
                return Err(QuarryError::Research {
                    message: format!("session {} has no recorded start", session_id),
                });
            }
            ResearchStatus::Cancelled => {
                self.record(&mut state, EventPayload::ResearchResumed(ResearchResumed {}))
                    .await?;
            }
            _ => {}
        }
        info!(session_id, status = %state.status, "Resuming research");
        self.drive(state, cancel).await
    }

    /// Rebuild a session's state from its log.
    pub async fn load(&self, session_id: &str) -> Result<ResearchState> {
        let events = self.store.load_events(session_id).await?;
        Ok(load_from_events(session_id, &events)?)
    }

    pub async fn events(&self, session_id: &str) -> Result<Vec<Event>> {
        Ok(self.store.load_events(session_id).await?)
    }

    /// Every stored session, sorted by id.
    pub async fn list_sessions(&self) -> Result<Vec<ResearchState>> {
        let mut sessions = Vec::new();
        for id in self.store.list_session_ids().await? {
            sessions.push(self.load(&id).await?);
        }
        Ok(sessions)
    }

    /// The chain of sessions ending at `session_id`, root first.
    pub async fn lineage(&self, session_id: &str) -> Result<Vec<ResearchState>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(session_id.to_string());
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                break;
            }
            let state = self.load(&id).await?;
            next = state.parent_id.clone();
            chain.push(state);
        }
        chain.reverse();
        Ok(chain)
    }

    async fn begin(
        &self,
        id: String,
        request: ResearchRequest,
        parent_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(QuarryError::Research {
                message: "query must not be empty".to_string(),
            });
        }
        let mut state = ResearchState::new(id);
        self.record(
            &mut state,
            EventPayload::ResearchStarted(ResearchStarted {
                query,
                strategy: request.strategy,
                settings: request.settings,
                parent_id,
            }),
        )
        .await?;
        info!(session_id = %state.id, strategy = %state.strategy, "Research started");
        self.drive(state, cancel).await
    }

    /// Append, commit and publish one event.
    async fn record(&self, state: &mut ResearchState, payload: EventPayload) -> Result<()> {
        let event = Event::new(state.id.clone(), state.next_sequence(), payload);
        let mut next = state.clone();
        next.apply(&event)?;
        self.store.append(&state.id, &event).await?;
        *state = next;
        self.bus.publish(&event);
        Ok(())
    }

    /// Run phases under the session timeout and settle the outcome.
    async fn drive(&self, mut state: ResearchState, cancel: CancellationToken) -> Result<ResearchState> {
        let token = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timeout_secs = state.settings.timeout_secs;
        let timer = {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };

        let ctx = AgentContext::new(self.brain.clone(), self.tools.clone(), token.clone());
        // Model spend not yet written to the log.
        let mut spend = CostBreakdown::default();
        let outcome = self.advance(&mut state, &ctx, &mut spend).await;
        token.cancel();
        timer.abort();

        match outcome {
            Ok(()) => Ok(state),
            Err(e) if e.is_cancelled() => {
                let reason = if timed_out.load(Ordering::SeqCst) {
                    format!("timeout after {}s", timeout_secs)
                } else {
                    "cancelled by user".to_string()
                };
                if state.status.is_active() {
                    warn!(session_id = %state.id, %reason, "Research cancelled");
                    self.record(
                        &mut state,
                        EventPayload::ResearchCancelled(ResearchCancelled {
                            reason,
                            cost: spend,
                        }),
                    )
                    .await?;
                }
                Ok(state)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let phase = phase_name(state.status).to_string();
                warn!(session_id = %state.id, %phase, error = %e, "Research failed");
                if state.status.is_active() {
                    self.record(
                        &mut state,
                        EventPayload::ResearchFailed(ResearchFailed {
                            error: e.to_string(),
                            phase,
                            cost: spend,
                        }),
                    )
                    .await?;
                }
                Ok(state)
            }
        }
    }

    /// Step through phases until the session settles.
    ///
    /// Phases add model spend to `spend` as it happens and move it onto the
    /// event that records their result.
    async fn advance(
        &self,
        state: &mut ResearchState,
        ctx: &AgentContext,
        spend: &mut CostBreakdown,
    ) -> Result<()> {
        loop {
            match state.status {
                ResearchStatus::Running => {
                    if state.perspectives.is_empty() {
                        self.discover(state, ctx, spend).await?;
                    }
                    self.fan_out(state, ctx).await?;
                    if ctx.cancel.is_cancelled() {
                        return Err(QuarryError::Cancelled);
                    }
                    if state.completed_workers() == 0 {
                        let error = format!("all {} workers failed", state.workers.len());
                        warn!(session_id = %state.id, %error, "No worker produced findings");
                        self.record(
                            state,
                            EventPayload::ResearchFailed(ResearchFailed {
                                error,
                                phase: "workers".to_string(),
                                cost: std::mem::take(spend),
                            }),
                        )
                        .await?;
                        return Ok(());
                    }
                    let total_facts = state.all_facts().len();
                    self.record(
                        state,
                        EventPayload::AnalysisStarted(AnalysisStarted { total_facts }),
                    )
                    .await?;
                }
                ResearchStatus::Analyzing => {
                    if state.analysis.is_none() {
                        self.analyze(state, ctx, spend).await?;
                    }
                    if state.settings.gap_filling && state.gap_fill.is_none() {
                        self.fill_gaps(state, ctx, spend).await?;
                    }
                    self.record(state, EventPayload::SynthesisStarted(SynthesisStarted {}))
                        .await?;
                }
                ResearchStatus::Synthesizing => {
                    if state.report.is_none() {
                        self.synthesize(state, ctx, spend).await?;
                    }
                    self.complete(state).await?;
                }
                ResearchStatus::Pending
                | ResearchStatus::Complete
                | ResearchStatus::Failed
                | ResearchStatus::Cancelled => return Ok(()),
            }
        }
    }

    async fn discover(
        &self,
        state: &mut ResearchState,
        ctx: &AgentContext,
        spend: &mut CostBreakdown,
    ) -> Result<()> {
        let discovery = self
            .discovery
            .discover(ctx, &self.config, &state.query, spend)
            .await?;
        info!(
            session_id = %state.id,
            perspectives = discovery.perspectives.len(),
            "Perspectives discovered"
        );
        self.record(
            state,
            EventPayload::PerspectivesDiscovered(PerspectivesDiscovered {
                perspectives: discovery.perspectives,
                survey_queries: discovery.survey_queries,
                cost: std::mem::take(spend),
            }),
        )
        .await
    }

    /// Run every pending worker, at most `max_workers` at a time.
    ///
    /// Results are recorded as they arrive. After cancellation no new worker
    /// starts and running ones are recorded as interrupted.
    async fn fan_out(&self, state: &mut ResearchState, ctx: &AgentContext) -> Result<()> {
        let mut queue: VecDeque<Perspective> = state.pending_perspectives().into();
        let semaphore = Arc::new(Semaphore::new(state.settings.max_workers.max(1)));
        let mut set: JoinSet<WorkerRun> = JoinSet::new();
        let mut running: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                biased;
                Some(joined) = set.join_next(), if !set.is_empty() => {
                    match joined {
                        Ok(run) => {
                            running.remove(&run.perspective);
                            self.record_worker(state, run).await?;
                        }
                        Err(e) => warn!(session_id = %state.id, error = %e, "Worker task ended abnormally"),
                    }
                }
                permit = semaphore.clone().acquire_owned(),
                    if !queue.is_empty() && !ctx.cancel.is_cancelled() =>
                {
                    let Ok(permit) = permit else { break };
                    let Some(perspective) = queue.pop_front() else { continue };
                    if !state.can_start_worker(&perspective.name) {
                        continue;
                    }
                    let attempt = state
                        .workers
                        .get(&perspective.name)
                        .map(|w| w.attempts + 1)
                        .unwrap_or(1);
                    self.record(
                        state,
                        EventPayload::WorkerStarted(WorkerStarted {
                            perspective: perspective.name.clone(),
                            attempt,
                        }),
                    )
                    .await?;
                    running.insert(perspective.name.clone());
                    let strategy = state.strategy;
                    let query = state.query.clone();
                    let ctx = ctx.clone();
                    let config = self.config.clone();
                    set.spawn(async move {
                        let _permit = permit;
                        run_worker(strategy, query, perspective, ctx, config).await
                    });
                }
                else => break,
            }
        }

        // Tasks that died without reporting still need a terminal record.
        for perspective in running {
            self.record(
                state,
                EventPayload::WorkerFailed(WorkerFailed {
                    perspective,
                    error: "worker task ended without a result".to_string(),
                    cancelled: ctx.cancel.is_cancelled(),
                    cost: CostBreakdown::default(),
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn record_worker(&self, state: &mut ResearchState, run: WorkerRun) -> Result<()> {
        let cancelled = run.is_cancelled();
        let payload = match run.result {
            Ok(findings) => EventPayload::WorkerCompleted(WorkerCompleted {
                perspective: run.perspective,
                findings,
                cost: run.cost,
            }),
            Err(e) => EventPayload::WorkerFailed(WorkerFailed {
                perspective: run.perspective,
                error: e.to_string(),
                cancelled,
                cost: run.cost,
            }),
        };
        self.record(state, payload).await
    }

    async fn analyze(
        &self,
        state: &mut ResearchState,
        ctx: &AgentContext,
        spend: &mut CostBreakdown,
    ) -> Result<()> {
        let analysis = AnalysisAgent::new(ctx)
            .analyze(
                &state.query,
                &state.all_facts(),
                &state.expected_questions(),
                spend,
            )
            .await?;
        self.record(
            state,
            EventPayload::AnalysisCompleted(AnalysisCompleted {
                analysis,
                cost: std::mem::take(spend),
            }),
        )
        .await
    }

    /// Research the most important open gaps once; skipped when none qualify.
    ///
    /// A failed attempt records nothing and its spend stays in `spend` for the
    /// next recorded event.
    async fn fill_gaps(
        &self,
        state: &mut ResearchState,
        ctx: &AgentContext,
        spend: &mut CostBreakdown,
    ) -> Result<()> {
        let targets = gap_targets(
            state
                .analysis
                .as_ref()
                .map(|a| a.knowledge_gaps.as_slice())
                .unwrap_or_default(),
            self.config.gap_importance_threshold,
        );
        if targets.is_empty() {
            debug!(session_id = %state.id, "No knowledge gap worth filling");
            return Ok(());
        }

        let result = ReactLoop::new(ctx, &self.config)
            .fill_gaps(&state.query, &targets, spend)
            .await;
        let findings = match result {
            Ok(findings) => findings,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(session_id = %state.id, error = %e, "Gap filling failed; continuing without it");
                return Ok(());
            }
        };
        info!(
            session_id = %state.id,
            gaps = targets.len(),
            facts = findings.facts.len(),
            "Gap filling finished"
        );
        self.record(
            state,
            EventPayload::GapFillCompleted(GapFillCompleted {
                targeted: targets.into_iter().map(|g| g.description).collect(),
                findings,
                cost: std::mem::take(spend),
            }),
        )
        .await
    }

    async fn synthesize(
        &self,
        state: &mut ResearchState,
        ctx: &AgentContext,
        spend: &mut CostBreakdown,
    ) -> Result<()> {
        let input = SynthesisInput {
            query: state.query.clone(),
            perspectives: state.perspectives.clone(),
            transcripts: state
                .perspectives
                .iter()
                .filter_map(|p| state.workers.get(&p.name))
                .filter(|w| !w.findings.transcript.is_empty())
                .map(|w| (w.perspective.clone(), w.findings.transcript.clone()))
                .collect(),
            facts: state.all_facts(),
            sources: state.all_sources(),
            analysis: state.analysis.clone().unwrap_or_default(),
        };
        let report = SynthesisAgent::new(ctx).synthesize(&input, spend).await?;
        self.record(
            state,
            EventPayload::SynthesisCompleted(SynthesisCompleted {
                report,
                cost: std::mem::take(spend),
            }),
        )
        .await
    }

    async fn complete(&self, state: &mut ResearchState) -> Result<()> {
        let duration_ms = state
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64)
            .unwrap_or_default();
        let source_count = state.all_sources().len();
        let total_cost_usd = state.cost.total_cost_usd;
        self.record(
            state,
            EventPayload::ResearchCompleted(ResearchCompleted {
                duration_ms,
                source_count,
                total_cost_usd,
            }),
        )
        .await?;
        info!(
            session_id = %state.id,
            sources = source_count,
            cost_usd = state.cost.total_cost_usd,
            "Research complete"
        );
        Ok(())
    }
}

/// Gaps at or above `threshold`, most important first.
pub fn gap_targets(gaps: &[KnowledgeGap], threshold: f64) -> Vec<KnowledgeGap> {
    let mut targets: Vec<KnowledgeGap> = gaps
        .iter()
        .filter(|g| g.importance >= threshold)
        .cloned()
        .collect();
    targets.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    targets.truncate(MAX_GAP_TARGETS);
    targets
}

fn phase_name(status: ResearchStatus) -> &'static str {
    match status {
        ResearchStatus::Pending | ResearchStatus::Running => "workers",
        ResearchStatus::Analyzing => "analysis",
        ResearchStatus::Synthesizing => "synthesis",
        ResearchStatus::Complete | ResearchStatus::Failed | ResearchStatus::Cancelled => "done",
    }
}
