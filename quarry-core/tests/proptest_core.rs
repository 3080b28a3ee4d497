//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use quarry_core::aggregate::{ResearchStatus, load_from_events};
use quarry_core::events::*;
use quarry_core::research::parse::{extract_json, truncate_chars};
use quarry_core::session::{next_version_id, parse_version};
use quarry_core::types::{
    AnalysisResult, CostBreakdown, Perspective, Report, TokenUsage, WorkerFindings,
    WorkerStrategy,
};

const SESSION: &str = "2026-10-16-feedbeef";

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

/// A complete, valid session log with one worker per cost entry.
fn session_log(worker_costs: &[(u64, u64)]) -> Vec<Event> {
    let perspectives: Vec<Perspective> = (0..worker_costs.len())
        .map(|i| Perspective::new(format!("Perspective {}", i), "focus", vec![]))
        .collect();
    let mut payloads = vec![
        EventPayload::ResearchStarted(ResearchStarted {
            query: "property testing".into(),
            strategy: WorkerStrategy::Storm,
            settings: SessionSettings::default(),
            parent_id: None,
        }),
        EventPayload::PerspectivesDiscovered(PerspectivesDiscovered {
            perspectives: perspectives.clone(),
            survey_queries: vec![],
            cost: cost(10, 5),
        }),
    ];
    for (p, (input, output)) in perspectives.iter().zip(worker_costs) {
        payloads.push(EventPayload::WorkerStarted(WorkerStarted {
            perspective: p.name.clone(),
            attempt: 1,
        }));
        payloads.push(EventPayload::WorkerCompleted(WorkerCompleted {
            perspective: p.name.clone(),
            findings: WorkerFindings::default(),
            cost: cost(*input, *output),
        }));
    }
    payloads.extend([
        EventPayload::AnalysisStarted(AnalysisStarted { total_facts: 0 }),
        EventPayload::AnalysisCompleted(AnalysisCompleted {
            analysis: AnalysisResult::default(),
            cost: cost(20, 10),
        }),
        EventPayload::SynthesisStarted(SynthesisStarted {}),
        EventPayload::SynthesisCompleted(SynthesisCompleted {
            report: Report {
                title: "property testing".into(),
                ..Report::default()
            },
            cost: cost(30, 15),
        }),
        EventPayload::ResearchCompleted(ResearchCompleted {
            duration_ms: 1,
            source_count: 0,
            total_cost_usd: 0.0,
        }),
    ]);
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| Event::new(SESSION, i as u64 + 1, payload))
        .collect()
}

fn worker_costs() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..100_000, 0u64..100_000), 1..6)
}

// --- Aggregate fold properties ---

proptest! {
    #[test]
    fn replay_is_deterministic(costs in worker_costs()) {
        let events = session_log(&costs);
        let first = load_from_events(SESSION, &events).unwrap();
        let second = load_from_events(SESSION, &events).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.status, ResearchStatus::Complete);
        prop_assert_eq!(first.version, events.len() as u64);
    }

    #[test]
    fn replay_through_json_matches(costs in worker_costs()) {
        let events = session_log(&costs);
        let decoded: Vec<Event> = events
            .iter()
            .map(|e| Event::from_json(&e.to_json().unwrap()).unwrap())
            .collect();
        prop_assert_eq!(
            load_from_events(SESSION, &events).unwrap(),
            load_from_events(SESSION, &decoded).unwrap()
        );
    }

    #[test]
    fn cost_is_sum_of_deltas(costs in worker_costs()) {
        let events = session_log(&costs);
        let state = load_from_events(SESSION, &events).unwrap();

        let mut expected = CostBreakdown::default();
        for event in &events {
            if let Some(delta) = event.cost() {
                expected.add(delta);
            }
        }
        prop_assert_eq!(state.cost.total_tokens, expected.total_tokens);
        prop_assert!((state.cost.total_cost_usd - expected.total_cost_usd).abs() < 1e-9);

        let worker_tokens: u64 = costs.iter().map(|(i, o)| i + o).sum();
        prop_assert_eq!(state.cost.total_tokens, worker_tokens + 15 + 30 + 45);
    }

    #[test]
    fn fold_rejects_swapped_events(costs in worker_costs(), a in 0usize..64, b in 0usize..64) {
        let mut events = session_log(&costs);
        let a = a % events.len();
        let b = b % events.len();
        prop_assume!(a != b);
        events.swap(a, b);
        prop_assert!(load_from_events(SESSION, &events).is_err());
    }

    #[test]
    fn fold_rejects_missing_event(costs in worker_costs(), gap in 0usize..64) {
        let mut events = session_log(&costs);
        let gap = gap % (events.len() - 1);
        events.remove(gap);
        prop_assert!(load_from_events(SESSION, &events).is_err());
    }

    #[test]
    fn every_prefix_replays(costs in worker_costs(), cut in 0usize..64) {
        let events = session_log(&costs);
        let cut = cut % (events.len() + 1);
        let state = load_from_events(SESSION, &events[..cut]).unwrap();
        prop_assert_eq!(state.version, cut as u64);
        prop_assert!((0.0..=1.0).contains(&state.progress));
    }
}

// --- Session id properties ---

proptest! {
    #[test]
    fn follow_up_version_exceeds_existing(versions in prop::collection::vec(2u32..50, 0..8)) {
        let root = "2026-10-16-0badf00d";
        let existing: Vec<String> = versions.iter().map(|v| format!("{}-v{}", root, v)).collect();
        let next = next_version_id(root, &existing);
        let (next_root, next_version) = parse_version(&next);
        prop_assert_eq!(next_root, root);
        prop_assert!(versions.iter().all(|v| *v < next_version));
    }
}

// --- Parsing properties ---

proptest! {
    #[test]
    fn extract_json_never_panics(text in ".{0,200}") {
        let _ = extract_json::<Vec<String>>(&text);
        let _ = extract_json::<serde_json::Value>(&text);
    }

    #[test]
    fn extract_json_finds_embedded_array(items in prop::collection::vec("[a-z ]{1,12}", 0..6), prefix in "[A-Za-z .]{0,30}") {
        let text = format!("{}\n{}", prefix, serde_json::to_string(&items).unwrap());
        prop_assert_eq!(extract_json::<Vec<String>>(&text), Some(items));
    }

    #[test]
    fn truncate_chars_bounds_length(text in ".{0,100}", max in 0usize..50) {
        let out = truncate_chars(&text, max);
        prop_assert!(out.chars().count() <= max + 3);
        if text.chars().count() <= max {
            prop_assert_eq!(out, text);
        }
    }
}
