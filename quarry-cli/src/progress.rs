//! Live progress lines from the event bus.

use quarry_core::EventBus;
use quarry_core::events::{Event, EventPayload};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// One human-readable line per event.
pub fn describe(event: &Event) -> String {
    match &event.payload {
        EventPayload::ResearchStarted(e) => {
            format!("Researching \"{}\" ({} strategy)", e.query, e.strategy)
        }
        EventPayload::PerspectivesDiscovered(e) => {
            let names: Vec<&str> = e.perspectives.iter().map(|p| p.name.as_str()).collect();
            format!("{} perspectives: {}", names.len(), names.join(", "))
        }
        EventPayload::WorkerStarted(e) => format!("  > {}", e.perspective),
        EventPayload::WorkerCompleted(e) => format!(
            "  + {}: {} facts, {} sources",
            e.perspective,
            e.findings.facts.len(),
            e.findings.sources.len()
        ),
        EventPayload::WorkerFailed(e) if e.cancelled => {
            format!("  - {}: interrupted", e.perspective)
        }
        EventPayload::WorkerFailed(e) => format!("  ! {}: {}", e.perspective, e.error),
        EventPayload::AnalysisStarted(e) => format!("Analyzing {} facts", e.total_facts),
        EventPayload::AnalysisCompleted(e) => format!(
            "{} validated, {} contradictions, {} gaps",
            e.analysis.validated_facts.len(),
            e.analysis.contradictions.len(),
            e.analysis.knowledge_gaps.len()
        ),
        EventPayload::GapFillCompleted(e) => format!(
            "Filled {} gaps with {} new facts",
            e.targeted.len(),
            e.findings.facts.len()
        ),
        EventPayload::SynthesisStarted(_) => "Writing report".to_string(),
        EventPayload::SynthesisCompleted(e) => {
            format!("Report: {} sections", e.report.sections.len())
        }
        EventPayload::ResearchCompleted(e) => format!(
            "Done in {:.1}s, {} sources, ${:.4}",
            e.duration_ms as f64 / 1000.0,
            e.source_count,
            e.total_cost_usd
        ),
        EventPayload::ResearchFailed(e) => format!("Failed during {}: {}", e.phase, e.error),
        EventPayload::ResearchCancelled(e) => format!("Cancelled: {}", e.reason),
        EventPayload::ResearchResumed(_) => "Resuming".to_string(),
    }
}

/// Print progress to stderr until the bus closes.
pub fn spawn_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("{}", describe(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("  ({} progress updates skipped)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_core::events::{ResearchCancelled, WorkerFailed};

    #[test]
    fn test_describe_worker_failure() {
        let event = Event::new(
            "s1",
            3,
            EventPayload::WorkerFailed(WorkerFailed {
                perspective: "Economist".into(),
                error: "boom".into(),
                cancelled: false,
                cost: Default::default(),
            }),
        );
        assert_eq!(describe(&event), "  ! Economist: boom");
    }

    #[test]
    fn test_describe_cancelled() {
        let event = Event::new(
            "s1",
            4,
            EventPayload::ResearchCancelled(ResearchCancelled {
                reason: "cancelled by user".into(),
                cost: Default::default(),
            }),
        );
        assert_eq!(describe(&event), "Cancelled: cancelled by user");
    }
}
