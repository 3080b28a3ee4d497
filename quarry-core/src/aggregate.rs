//! Research session aggregate.
//!
//! [`ResearchState`] is rebuilt by folding a session's event log from an empty
//! state. [`ResearchState::apply`] is the only code that mutates it: the
//! orchestrator applies each event it appends through the same function, so
//! the in-memory state and the durable log cannot disagree. Every guard runs
//! before any field changes, so a rejected event leaves the state untouched.

use crate::error::AggregateError;
use crate::events::{Event, EventPayload, SessionSettings};
use crate::types::{
    AnalysisResult, CostBreakdown, Fact, Perspective, Report, Source, WorkerFindings,
    WorkerStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Pending,
    /// Discovering perspectives or running workers.
    Running,
    Analyzing,
    Synthesizing,
    Complete,
    Failed,
    /// Interrupted by the caller or the session timeout; resumable.
    Cancelled,
}

impl ResearchStatus {
    /// Complete and failed sessions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Complete | ResearchStatus::Failed)
    }

    /// Whether work can still happen in this status without a resume.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ResearchStatus::Running | ResearchStatus::Analyzing | ResearchStatus::Synthesizing
        )
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::Running => "running",
            ResearchStatus::Analyzing => "analyzing",
            ResearchStatus::Synthesizing => "synthesizing",
            ResearchStatus::Complete => "complete",
            ResearchStatus::Failed => "failed",
            ResearchStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Status of one perspective's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Complete => write!(f, "complete"),
            WorkerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Recorded state of the worker for one perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub perspective: String,
    pub status: WorkerStatus,
    pub attempts: u32,
    pub findings: WorkerFindings,
    pub cost: CostBreakdown,
    pub error: Option<String>,
    /// The last failure was an interruption, not a fault.
    pub interrupted: bool,
}

impl WorkerState {
    fn started(perspective: &str, attempt: u32) -> Self {
        Self {
            perspective: perspective.to_string(),
            status: WorkerStatus::Running,
            attempts: attempt,
            findings: WorkerFindings::default(),
            cost: CostBreakdown::default(),
            error: None,
            interrupted: false,
        }
    }
}

/// Why a session stopped with `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
    pub phase: String,
}

/// The reconstructable state of one research session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub id: String,
    pub parent_id: Option<String>,
    pub query: String,
    pub strategy: WorkerStrategy,
    pub settings: SessionSettings,
    pub status: ResearchStatus,
    pub perspectives: Vec<Perspective>,
    pub survey_queries: Vec<String>,
    pub workers: BTreeMap<String, WorkerState>,
    pub analysis: Option<AnalysisResult>,
    pub gap_fill: Option<WorkerFindings>,
    pub report: Option<Report>,
    pub cost: CostBreakdown,
    /// Derived 0..1 estimate for display only.
    pub progress: f64,
    /// Sequence number of the last applied event.
    pub version: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<Failure>,
    pub cancellation: Option<String>,
    /// Status to restore when a cancelled session is resumed.
    pub suspended_in: Option<ResearchStatus>,
    pub resumes: u32,
}

/// Rebuild a session's state by folding its events in order.
pub fn load_from_events(session_id: &str, events: &[Event]) -> Result<ResearchState, AggregateError> {
    let mut state = ResearchState::new(session_id);
    for event in events {
        state.apply(event)?;
    }
    Ok(state)
}

impl ResearchState {
    /// Empty state for a session that has no events yet.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: session_id.into(),
            ..Self::default()
        }
    }

    /// Sequence number the next appended event must carry.
    pub fn next_sequence(&self) -> u64 {
        self.version + 1
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply one event. This is the single mutation path for session state.
    pub fn apply(&mut self, event: &Event) -> Result<(), AggregateError> {
        if event.session_id != self.id {
            return Err(AggregateError::SessionMismatch {
                expected: self.id.clone(),
                found: event.session_id.clone(),
            });
        }
        if event.sequence != self.next_sequence() {
            return Err(AggregateError::OutOfOrder {
                expected: self.next_sequence(),
                found: event.sequence,
            });
        }

        let event_type = event.event_type();
        match &event.payload {
            EventPayload::ResearchStarted(p) => {
                self.require(event_type, &[ResearchStatus::Pending])?;
                self.query = p.query.clone();
                self.strategy = p.strategy;
                self.settings = p.settings.clone();
                self.parent_id = p.parent_id.clone();
                self.started_at = Some(event.timestamp);
                self.status = ResearchStatus::Running;
            }
            EventPayload::PerspectivesDiscovered(p) => {
                self.require(event_type, &[ResearchStatus::Running])?;
                if !self.perspectives.is_empty() || p.perspectives.is_empty() {
                    return Err(self.invalid(event_type));
                }
                self.perspectives = p.perspectives.clone();
                self.survey_queries = p.survey_queries.clone();
            }
            EventPayload::WorkerStarted(p) => {
                self.require(event_type, &[ResearchStatus::Running])?;
                if !self.perspectives.iter().any(|x| x.name == p.perspective) {
                    return Err(AggregateError::UnknownWorker {
                        perspective: p.perspective.clone(),
                    });
                }
                if let Some(worker) = self.workers.get(&p.perspective)
                    && worker.status == WorkerStatus::Complete
                {
                    return Err(worker_invalid(worker, event_type));
                }
                let mut worker = WorkerState::started(&p.perspective, p.attempt);
                if let Some(previous) = self.workers.get(&p.perspective) {
                    worker.cost = previous.cost;
                }
                self.workers.insert(p.perspective.clone(), worker);
            }
            EventPayload::WorkerCompleted(p) => {
                self.require(event_type, &[ResearchStatus::Running])?;
                let worker = self.running_worker(&p.perspective, event_type)?;
                worker.status = WorkerStatus::Complete;
                worker.findings = p.findings.clone();
                worker.cost.add(&p.cost);
                worker.error = None;
            }
            EventPayload::WorkerFailed(p) => {
                self.require(event_type, &[ResearchStatus::Running])?;
                let worker = self.running_worker(&p.perspective, event_type)?;
                worker.status = WorkerStatus::Failed;
                worker.error = Some(p.error.clone());
                worker.interrupted = p.cancelled;
                worker.cost.add(&p.cost);
            }
            EventPayload::AnalysisStarted(_) => {
                self.require(event_type, &[ResearchStatus::Running])?;
                let still_running = self
                    .workers
                    .values()
                    .any(|w| w.status == WorkerStatus::Running);
                if self.perspectives.is_empty() || still_running {
                    return Err(self.invalid(event_type));
                }
                self.status = ResearchStatus::Analyzing;
            }
            EventPayload::AnalysisCompleted(p) => {
                self.require(event_type, &[ResearchStatus::Analyzing])?;
                if self.analysis.is_some() {
                    return Err(self.invalid(event_type));
                }
                self.analysis = Some(p.analysis.clone());
            }
            EventPayload::GapFillCompleted(p) => {
                self.require(event_type, &[ResearchStatus::Analyzing])?;
                if self.analysis.is_none() || self.gap_fill.is_some() {
                    return Err(self.invalid(event_type));
                }
                self.gap_fill = Some(p.findings.clone());
            }
            EventPayload::SynthesisStarted(_) => {
                self.require(event_type, &[ResearchStatus::Analyzing])?;
                if self.analysis.is_none() {
                    return Err(self.invalid(event_type));
                }
                self.status = ResearchStatus::Synthesizing;
            }
            EventPayload::SynthesisCompleted(p) => {
                self.require(event_type, &[ResearchStatus::Synthesizing])?;
                if self.report.is_some() {
                    return Err(AggregateError::ReportAlreadySet);
                }
                self.report = Some(p.report.clone());
            }
            EventPayload::ResearchCompleted(_) => {
                self.require(event_type, &[ResearchStatus::Synthesizing])?;
                if self.report.is_none() {
                    return Err(self.invalid(event_type));
                }
                self.status = ResearchStatus::Complete;
                self.completed_at = Some(event.timestamp);
            }
            EventPayload::ResearchFailed(p) => {
                self.require(
                    event_type,
                    &[
                        ResearchStatus::Running,
                        ResearchStatus::Analyzing,
                        ResearchStatus::Synthesizing,
                    ],
                )?;
                self.failure = Some(Failure {
                    error: p.error.clone(),
                    phase: p.phase.clone(),
                });
                self.status = ResearchStatus::Failed;
                self.completed_at = Some(event.timestamp);
            }
            EventPayload::ResearchCancelled(p) => {
                self.require(
                    event_type,
                    &[
                        ResearchStatus::Running,
                        ResearchStatus::Analyzing,
                        ResearchStatus::Synthesizing,
                    ],
                )?;
                self.suspended_in = Some(self.status);
                self.cancellation = Some(p.reason.clone());
                self.status = ResearchStatus::Cancelled;
            }
            EventPayload::ResearchResumed(_) => {
                self.require(event_type, &[ResearchStatus::Cancelled])?;
                self.status = self.suspended_in.take().unwrap_or(ResearchStatus::Running);
                self.cancellation = None;
                self.resumes += 1;
            }
        }

        if let Some(cost) = event.cost() {
            self.cost.add(cost);
        }
        self.version = event.sequence;
        self.updated_at = Some(event.timestamp);
        self.recompute_progress();
        Ok(())
    }

    fn require(&self, event_type: &str, allowed: &[ResearchStatus]) -> Result<(), AggregateError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.invalid(event_type))
        }
    }

    fn invalid(&self, event_type: &str) -> AggregateError {
        AggregateError::InvalidTransition {
            event_type: event_type.to_string(),
            status: self.status.to_string(),
        }
    }

    fn running_worker(
        &mut self,
        perspective: &str,
        event_type: &str,
    ) -> Result<&mut WorkerState, AggregateError> {
        let worker = self
            .workers
            .get_mut(perspective)
            .ok_or_else(|| AggregateError::UnknownWorker {
                perspective: perspective.to_string(),
            })?;
        if worker.status != WorkerStatus::Running {
            return Err(worker_invalid(worker, event_type));
        }
        Ok(worker)
    }

    fn recompute_progress(&mut self) {
        self.progress = match self.status {
            ResearchStatus::Pending => 0.0,
            ResearchStatus::Running if self.perspectives.is_empty() => 0.05,
            ResearchStatus::Running => {
                let total = self.perspectives.len() as f64;
                let done = self
                    .workers
                    .values()
                    .filter(|w| w.status != WorkerStatus::Running)
                    .count() as f64;
                0.1 + 0.6 * (done / total)
            }
            ResearchStatus::Analyzing if self.analysis.is_some() => 0.8,
            ResearchStatus::Analyzing => 0.7,
            ResearchStatus::Synthesizing => 0.85,
            ResearchStatus::Complete => 1.0,
            ResearchStatus::Failed | ResearchStatus::Cancelled => self.progress,
        };
    }

    /// Perspectives whose worker has not completed, in discovery order.
    pub fn pending_perspectives(&self) -> Vec<Perspective> {
        self.perspectives
            .iter()
            .filter(|p| {
                self.workers
                    .get(&p.name)
                    .is_none_or(|w| w.status != WorkerStatus::Complete)
            })
            .cloned()
            .collect()
    }

    /// Whether a worker for `perspective` may be (re)started right now.
    pub fn can_start_worker(&self, perspective: &str) -> bool {
        self.status == ResearchStatus::Running
            && self.perspectives.iter().any(|p| p.name == perspective)
            && self
                .workers
                .get(perspective)
                .is_none_or(|w| w.status != WorkerStatus::Complete)
    }

    pub fn completed_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Complete)
            .count()
    }

    /// Every fact from completed workers in perspective order, then gap-fill facts.
    pub fn all_facts(&self) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self
            .perspectives
            .iter()
            .filter_map(|p| self.workers.get(&p.name))
            .filter(|w| w.status == WorkerStatus::Complete)
            .flat_map(|w| w.findings.facts.iter().cloned())
            .collect();
        if let Some(gap_fill) = &self.gap_fill {
            facts.extend(gap_fill.facts.iter().cloned());
        }
        facts
    }

    /// Sources across all perspectives, de-duplicated by URL, first seen wins.
    pub fn all_sources(&self) -> Vec<Source> {
        let mut seen = HashSet::new();
        self.perspectives
            .iter()
            .filter_map(|p| self.workers.get(&p.name))
            .flat_map(|w| w.findings.sources.iter())
            .chain(self.gap_fill.iter().flat_map(|g| g.sources.iter()))
            .filter(|s| seen.insert(s.url.clone()))
            .cloned()
            .collect()
    }

    /// Union of every perspective's seed questions, used as expected coverage.
    pub fn expected_questions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.perspectives
            .iter()
            .flat_map(|p| p.questions.iter())
            .filter(|q| seen.insert(q.to_lowercase()))
            .cloned()
            .collect()
    }
}

fn worker_invalid(worker: &WorkerState, event_type: &str) -> AggregateError {
    AggregateError::InvalidWorkerTransition {
        perspective: worker.perspective.clone(),
        status: worker.status.to_string(),
        event_type: event_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::*;
    use crate::types::TokenUsage;
    use pretty_assertions::assert_eq;

    const SID: &str = "2026-10-16-0badc0de";

    fn cost(input: u64, output: u64) -> CostBreakdown {
        CostBreakdown::from_usage(
            &TokenUsage {
                input_tokens: input,
                output_tokens: output,
            },
            1.0,
            2.0,
        )
    }

    fn fact(perspective: &str, url: &str) -> Fact {
        Fact {
            content: format!("{} claim", perspective),
            source_url: url.into(),
            confidence: 0.8,
            perspective: perspective.into(),
        }
    }

    fn findings(perspective: &str, url: &str) -> WorkerFindings {
        WorkerFindings {
            facts: vec![fact(perspective, url)],
            sources: vec![Source {
                url: url.into(),
                title: String::new(),
                snippet: String::new(),
            }],
            ..WorkerFindings::default()
        }
    }

    /// A complete happy-path log for two perspectives.
    fn happy_log() -> Vec<Event> {
        let payloads = vec![
            EventPayload::ResearchStarted(ResearchStarted {
                query: "Compare X vs Y".into(),
                strategy: WorkerStrategy::Storm,
                settings: SessionSettings::default(),
                parent_id: None,
            }),
            EventPayload::PerspectivesDiscovered(PerspectivesDiscovered {
                perspectives: vec![
                    Perspective::new("X Advocate", "Strengths of X", vec!["Why X?".into()]),
                    Perspective::new("Y Advocate", "Strengths of Y", vec!["Why Y?".into()]),
                ],
                survey_queries: vec!["x vs y".into()],
                cost: cost(100, 10),
            }),
            EventPayload::WorkerStarted(WorkerStarted {
                perspective: "X Advocate".into(),
                attempt: 1,
            }),
            EventPayload::WorkerStarted(WorkerStarted {
                perspective: "Y Advocate".into(),
                attempt: 1,
            }),
            EventPayload::WorkerCompleted(WorkerCompleted {
                perspective: "Y Advocate".into(),
                findings: findings("Y Advocate", "https://y.dev"),
                cost: cost(300, 30),
            }),
            EventPayload::WorkerCompleted(WorkerCompleted {
                perspective: "X Advocate".into(),
                findings: findings("X Advocate", "https://x.dev"),
                cost: cost(200, 20),
            }),
            EventPayload::AnalysisStarted(AnalysisStarted { total_facts: 2 }),
            EventPayload::AnalysisCompleted(AnalysisCompleted {
                analysis: AnalysisResult::default(),
                cost: cost(50, 5),
            }),
            EventPayload::SynthesisStarted(SynthesisStarted {}),
            EventPayload::SynthesisCompleted(SynthesisCompleted {
                report: Report {
                    title: "Compare X vs Y".into(),
                    full_content: "# Compare X vs Y".into(),
                    ..Report::default()
                },
                cost: cost(400, 40),
            }),
            EventPayload::ResearchCompleted(ResearchCompleted {
                duration_ms: 1200,
                source_count: 2,
                total_cost_usd: 0.0,
            }),
        ];
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Event::new(SID, i as u64 + 1, p))
            .collect()
    }

    fn event(sequence: u64, payload: EventPayload) -> Event {
        Event::new(SID, sequence, payload)
    }

    #[test]
    fn test_fold_happy_path() {
        let state = load_from_events(SID, &happy_log()).unwrap();
        assert_eq!(state.status, ResearchStatus::Complete);
        assert_eq!(state.query, "Compare X vs Y");
        assert_eq!(state.workers.len(), 2);
        assert_eq!(state.completed_workers(), 2);
        assert_eq!(state.version, 11);
        assert_eq!(state.progress, 1.0);
        assert!(state.report.is_some());
        assert_eq!(state.cost.input_tokens, 1050);
        assert_eq!(state.cost.output_tokens, 105);
    }

    #[test]
    fn test_fold_is_deterministic() {
        let log = happy_log();
        let a = load_from_events(SID, &log).unwrap();
        let b = load_from_events(SID, &log).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_facts_follow_perspective_order_not_completion_order() {
        let state = load_from_events(SID, &happy_log()).unwrap();
        let facts = state.all_facts();
        assert_eq!(facts[0].perspective, "X Advocate");
        assert_eq!(facts[1].perspective, "Y Advocate");
    }

    #[test]
    fn test_out_of_order_sequence_rejected() {
        let mut log = happy_log();
        log.swap(2, 3);
        let err = load_from_events(SID, &log).unwrap_err();
        assert!(matches!(err, AggregateError::OutOfOrder { expected: 3, found: 4 }));
    }

    #[test]
    fn test_session_mismatch_rejected() {
        let log = happy_log();
        let err = load_from_events("other", &log).unwrap_err();
        assert!(matches!(err, AggregateError::SessionMismatch { .. }));
    }

    #[test]
    fn test_phase_skip_rejected() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..2]).unwrap();
        let err = state
            .apply(&event(3, EventPayload::SynthesisStarted(SynthesisStarted {})))
            .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidTransition { .. }));
        // a rejected event leaves state unchanged
        assert_eq!(state, load_from_events(SID, &log[..2]).unwrap());
    }

    #[test]
    fn test_analysis_waits_for_running_workers() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..5]).unwrap();
        let err = state
            .apply(&event(
                6,
                EventPayload::AnalysisStarted(AnalysisStarted { total_facts: 1 }),
            ))
            .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidTransition { .. }));
    }

    #[test]
    fn test_completed_worker_cannot_restart() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..5]).unwrap();
        let err = state
            .apply(&event(
                6,
                EventPayload::WorkerStarted(WorkerStarted {
                    perspective: "Y Advocate".into(),
                    attempt: 2,
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidWorkerTransition { .. }));
    }

    #[test]
    fn test_unknown_worker_rejected() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..2]).unwrap();
        let err = state
            .apply(&event(
                3,
                EventPayload::WorkerStarted(WorkerStarted {
                    perspective: "Ghost".into(),
                    attempt: 1,
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, AggregateError::UnknownWorker { .. }));
    }

    #[test]
    fn test_report_set_once() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..10]).unwrap();
        let err = state
            .apply(&event(
                11,
                EventPayload::SynthesisCompleted(SynthesisCompleted {
                    report: Report::default(),
                    cost: CostBreakdown::default(),
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, AggregateError::ReportAlreadySet));
    }

    #[test]
    fn test_failed_worker_can_retry_and_keeps_cost() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..4]).unwrap();
        state
            .apply(&event(
                5,
                EventPayload::WorkerFailed(WorkerFailed {
                    perspective: "X Advocate".into(),
                    error: "cancelled".into(),
                    cancelled: true,
                    cost: cost(10, 1),
                }),
            ))
            .unwrap();
        assert_eq!(state.workers["X Advocate"].status, WorkerStatus::Failed);
        assert!(state.workers["X Advocate"].interrupted);
        assert!(state.can_start_worker("X Advocate"));

        state
            .apply(&event(
                6,
                EventPayload::WorkerStarted(WorkerStarted {
                    perspective: "X Advocate".into(),
                    attempt: 2,
                }),
            ))
            .unwrap();
        let worker = &state.workers["X Advocate"];
        assert_eq!(worker.status, WorkerStatus::Running);
        assert_eq!(worker.attempts, 2);
        assert_eq!(worker.cost.input_tokens, 10);
    }

    #[test]
    fn test_cancel_and_resume_restores_phase() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..7]).unwrap();
        assert_eq!(state.status, ResearchStatus::Analyzing);
        let tokens_before = state.cost.total_tokens;

        state
            .apply(&event(
                8,
                EventPayload::ResearchCancelled(ResearchCancelled {
                    reason: "timeout".into(),
                    cost: cost(70, 7),
                }),
            ))
            .unwrap();
        assert_eq!(state.status, ResearchStatus::Cancelled);
        assert_eq!(state.cost.total_tokens, tokens_before + 77);
        assert_eq!(state.cancellation.as_deref(), Some("timeout"));
        assert!(!state.is_terminal());

        state
            .apply(&event(9, EventPayload::ResearchResumed(ResearchResumed {})))
            .unwrap();
        assert_eq!(state.status, ResearchStatus::Analyzing);
        assert_eq!(state.resumes, 1);
        assert!(state.cancellation.is_none());
    }

    #[test]
    fn test_terminal_states_reject_further_events() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log).unwrap();
        let err = state
            .apply(&event(
                12,
                EventPayload::ResearchFailed(ResearchFailed {
                    error: "late".into(),
                    phase: "synthesis".into(),
                    cost: Default::default(),
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failure_recorded() {
        let log = happy_log();
        let mut state = load_from_events(SID, &log[..2]).unwrap();
        state
            .apply(&event(
                3,
                EventPayload::ResearchFailed(ResearchFailed {
                    error: "every worker failed".into(),
                    phase: "workers".into(),
                    cost: Default::default(),
                }),
            ))
            .unwrap();
        assert_eq!(state.status, ResearchStatus::Failed);
        assert_eq!(state.failure.as_ref().unwrap().phase, "workers");
        assert!(state.is_terminal());
    }

    #[test]
    fn test_pending_perspectives_and_sources() {
        let log = happy_log();
        let state = load_from_events(SID, &log[..5]).unwrap();
        let pending: Vec<String> = state
            .pending_perspectives()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(pending, vec!["X Advocate"]);

        let done = load_from_events(SID, &log).unwrap();
        assert!(done.pending_perspectives().is_empty());
        assert_eq!(done.all_sources().len(), 2);
        assert_eq!(done.expected_questions(), vec!["Why X?", "Why Y?"]);
    }

    #[test]
    fn test_empty_log_is_pending() {
        let state = load_from_events(SID, &[]).unwrap();
        assert_eq!(state.status, ResearchStatus::Pending);
        assert_eq!(state.next_sequence(), 1);
    }
}
