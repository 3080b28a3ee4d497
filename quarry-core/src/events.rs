//! Research events: the unit of durability.
//!
//! Every state transition of a research session is recorded as an [`Event`]
//! carrying a typed [`EventPayload`]. On disk an event is a self-describing
//! JSON record `{id, session_id, sequence, timestamp, type, payload}`; decoding
//! reads `type` first and dispatches to the matching payload shape, so a type
//! this build does not know is rejected instead of skipped.

use crate::error::EventError;
use crate::types::{
    AnalysisResult, Citation, CostBreakdown, Perspective, Report, WorkerFindings, WorkerStrategy,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

pub const RESEARCH_STARTED: &str = "research.started";
pub const PERSPECTIVES_DISCOVERED: &str = "perspectives.discovered";
pub const WORKER_STARTED: &str = "worker.started";
pub const WORKER_COMPLETED: &str = "worker.completed";
pub const WORKER_FAILED: &str = "worker.failed";
pub const ANALYSIS_STARTED: &str = "analysis.started";
pub const ANALYSIS_COMPLETED: &str = "analysis.completed";
pub const GAP_FILL_COMPLETED: &str = "gap_fill.completed";
pub const SYNTHESIS_STARTED: &str = "synthesis.started";
pub const SYNTHESIS_COMPLETED: &str = "synthesis.completed";
pub const RESEARCH_COMPLETED: &str = "research.completed";
pub const RESEARCH_FAILED: &str = "research.failed";
pub const RESEARCH_CANCELLED: &str = "research.cancelled";
pub const RESEARCH_RESUMED: &str = "research.resumed";

/// Retired name of `perspectives.discovered`.
pub const LEGACY_PLAN_CREATED: &str = "plan.created";
/// Retired name of `synthesis.completed`, with the report fields inlined.
pub const LEGACY_REPORT_GENERATED: &str = "report.generated";

/// Per-session run settings captured when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub max_workers: usize,
    pub timeout_secs: u64,
    #[serde(default)]
    pub gap_filling: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_workers: 5,
            timeout_secs: 30 * 60,
            gap_filling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStarted {
    pub query: String,
    #[serde(default)]
    pub strategy: WorkerStrategy,
    #[serde(default)]
    pub settings: SessionSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectivesDiscovered {
    pub perspectives: Vec<Perspective>,
    #[serde(default)]
    pub survey_queries: Vec<String>,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStarted {
    pub perspective: String,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCompleted {
    pub perspective: String,
    pub findings: WorkerFindings,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailed {
    pub perspective: String,
    pub error: String,
    /// Set when the worker was interrupted rather than broken.
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStarted {
    pub total_facts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCompleted {
    pub analysis: AnalysisResult,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFillCompleted {
    /// Gap descriptions the step targeted.
    pub targeted: Vec<String>,
    pub findings: WorkerFindings,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisStarted {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisCompleted {
    pub report: Report,
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchCompleted {
    pub duration_ms: u64,
    pub source_count: usize,
    /// Session total at completion; informational, not a cost delta.
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFailed {
    pub error: String,
    pub phase: String,
    /// Spend of the interrupted phase not yet carried by another event.
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchCancelled {
    pub reason: String,
    /// Spend of the interrupted phase not yet carried by another event.
    #[serde(default)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResumed {}

/// Report payload shape written by older builds.
#[derive(Debug, Deserialize)]
struct LegacyReportGenerated {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    full_content: String,
    #[serde(default)]
    citations: Vec<Citation>,
    #[serde(default)]
    cost: CostBreakdown,
}

/// The typed body of an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    ResearchStarted(ResearchStarted),
    PerspectivesDiscovered(PerspectivesDiscovered),
    WorkerStarted(WorkerStarted),
    WorkerCompleted(WorkerCompleted),
    WorkerFailed(WorkerFailed),
    AnalysisStarted(AnalysisStarted),
    AnalysisCompleted(AnalysisCompleted),
    GapFillCompleted(GapFillCompleted),
    SynthesisStarted(SynthesisStarted),
    SynthesisCompleted(SynthesisCompleted),
    ResearchCompleted(ResearchCompleted),
    ResearchFailed(ResearchFailed),
    ResearchCancelled(ResearchCancelled),
    ResearchResumed(ResearchResumed),
}

impl EventPayload {
    /// The wire name of this payload's event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::ResearchStarted(_) => RESEARCH_STARTED,
            EventPayload::PerspectivesDiscovered(_) => PERSPECTIVES_DISCOVERED,
            EventPayload::WorkerStarted(_) => WORKER_STARTED,
            EventPayload::WorkerCompleted(_) => WORKER_COMPLETED,
            EventPayload::WorkerFailed(_) => WORKER_FAILED,
            EventPayload::AnalysisStarted(_) => ANALYSIS_STARTED,
            EventPayload::AnalysisCompleted(_) => ANALYSIS_COMPLETED,
            EventPayload::GapFillCompleted(_) => GAP_FILL_COMPLETED,
            EventPayload::SynthesisStarted(_) => SYNTHESIS_STARTED,
            EventPayload::SynthesisCompleted(_) => SYNTHESIS_COMPLETED,
            EventPayload::ResearchCompleted(_) => RESEARCH_COMPLETED,
            EventPayload::ResearchFailed(_) => RESEARCH_FAILED,
            EventPayload::ResearchCancelled(_) => RESEARCH_CANCELLED,
            EventPayload::ResearchResumed(_) => RESEARCH_RESUMED,
        }
    }

    /// The cost delta carried by this payload, if it is cost-bearing.
    pub fn cost(&self) -> Option<&CostBreakdown> {
        match self {
            EventPayload::PerspectivesDiscovered(p) => Some(&p.cost),
            EventPayload::WorkerCompleted(p) => Some(&p.cost),
            EventPayload::WorkerFailed(p) => Some(&p.cost),
            EventPayload::AnalysisCompleted(p) => Some(&p.cost),
            EventPayload::GapFillCompleted(p) => Some(&p.cost),
            EventPayload::SynthesisCompleted(p) => Some(&p.cost),
            EventPayload::ResearchFailed(p) => Some(&p.cost),
            EventPayload::ResearchCancelled(p) => Some(&p.cost),
            _ => None,
        }
    }

    /// Decode a payload from its wire type name and JSON body.
    pub fn decode(event_type: &str, payload: Value) -> Result<Self, EventError> {
        Ok(match event_type {
            RESEARCH_STARTED => EventPayload::ResearchStarted(body(event_type, payload)?),
            PERSPECTIVES_DISCOVERED | LEGACY_PLAN_CREATED => {
                EventPayload::PerspectivesDiscovered(body(event_type, payload)?)
            }
            WORKER_STARTED => EventPayload::WorkerStarted(body(event_type, payload)?),
            WORKER_COMPLETED => EventPayload::WorkerCompleted(body(event_type, payload)?),
            WORKER_FAILED => EventPayload::WorkerFailed(body(event_type, payload)?),
            ANALYSIS_STARTED => EventPayload::AnalysisStarted(body(event_type, payload)?),
            ANALYSIS_COMPLETED => EventPayload::AnalysisCompleted(body(event_type, payload)?),
            GAP_FILL_COMPLETED => EventPayload::GapFillCompleted(body(event_type, payload)?),
            SYNTHESIS_STARTED => EventPayload::SynthesisStarted(body(event_type, payload)?),
            SYNTHESIS_COMPLETED => EventPayload::SynthesisCompleted(body(event_type, payload)?),
            LEGACY_REPORT_GENERATED => {
                let legacy: LegacyReportGenerated = body(event_type, payload)?;
                EventPayload::SynthesisCompleted(SynthesisCompleted {
                    report: Report {
                        title: legacy.title,
                        summary: legacy.summary,
                        full_content: legacy.full_content,
                        citations: legacy.citations,
                        ..Report::default()
                    },
                    cost: legacy.cost,
                })
            }
            RESEARCH_COMPLETED => EventPayload::ResearchCompleted(body(event_type, payload)?),
            RESEARCH_FAILED => EventPayload::ResearchFailed(body(event_type, payload)?),
            RESEARCH_CANCELLED => EventPayload::ResearchCancelled(body(event_type, payload)?),
            RESEARCH_RESUMED => EventPayload::ResearchResumed(body(event_type, payload)?),
            other => {
                return Err(EventError::UnknownType {
                    event_type: other.to_string(),
                });
            }
        })
    }
}

fn body<T: DeserializeOwned>(event_type: &str, payload: Value) -> Result<T, EventError> {
    // Events without fields may be written with a null payload.
    let payload = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| EventError::MalformedPayload {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })
}

/// An immutable, appended record of one state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    /// 1-based position in the session log.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(session_id: impl Into<String>, sequence: u64, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn cost(&self) -> Option<&CostBreakdown> {
        self.payload.cost()
    }

    /// Decode an event from its JSON record.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(json).map_err(|e| EventError::MalformedPayload {
            event_type: "<envelope>".to_string(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn from_raw(raw: RawEvent) -> Result<Self, EventError> {
        let payload = EventPayload::decode(&raw.event_type, raw.payload)?;
        Ok(Self {
            id: raw.id,
            session_id: raw.session_id,
            sequence: raw.sequence,
            timestamp: raw.timestamp,
            payload,
        })
    }
}

/// Envelope as it appears on disk, before the payload is typed.
#[derive(Debug, Deserialize)]
struct RawEvent {
    id: Uuid,
    session_id: String,
    sequence: u64,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct EventRecord<'a> {
    id: &'a Uuid,
    session_id: &'a str,
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: &'static str,
    payload: &'a EventPayload,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EventRecord {
            id: &self.id,
            session_id: &self.session_id,
            sequence: self.sequence,
            timestamp: &self.timestamp,
            event_type: self.event_type(),
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        Event::from_raw(raw).map_err(serde::de::Error::custom)
    }
}
