//! Filesystem event store.
//!
//! Layout: `<base>/<session_id>/events/<sequence:06>_<type>.json`, one JSON
//! record per event. Loading orders records by the sequence stored in them,
//! so logs past six digits of sequence still replay in append order.

use super::{EventStore, validate_session_id};
use crate::error::StoreError;
use crate::events::Event;
use crate::persistence::durable_write_new;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable event store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    base_dir: PathBuf,
}

impl FileEventStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn events_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id).join("events")
    }

    /// File name for an event: `000007_worker_completed.json`.
    pub fn record_name(event: &Event) -> String {
        format!(
            "{:06}_{}.json",
            event.sequence,
            event.event_type().replace('.', "_")
        )
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn has_sequence(dir: &Path, sequence: u64) -> io::Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    let prefix = format!("{:06}_", sequence);
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".json") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn read_events(dir: &Path, session_id: &str) -> Result<Vec<Event>, StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::NotFound {
            session_id: session_id.to_string(),
        });
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut events = Vec::with_capacity(files.len());
    for path in files {
        let json = std::fs::read_to_string(&path).map_err(io_err(&path))?;
        let event = Event::from_json(&json).map_err(|source| StoreError::Decode {
            path: path.clone(),
            source,
        })?;
        if event.session_id != session_id {
            return Err(StoreError::Corrupt {
                path,
                message: format!("record belongs to session {}", event.session_id),
            });
        }
        events.push(event);
    }
    events.sort_by_key(|e| e.sequence);
    Ok(events)
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(&self, session_id: &str, event: &Event) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let dir = self.events_dir(session_id);
        let path = dir.join(Self::record_name(event));
        let json = event.to_json().map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let sequence = event.sequence;
        let session = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            if has_sequence(&dir, sequence).map_err(io_err(&dir))? {
                return Err(StoreError::SequenceConflict {
                    session_id: session,
                    sequence,
                });
            }
            durable_write_new(&path, json.as_bytes()).map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    StoreError::SequenceConflict {
                        session_id: session.clone(),
                        sequence,
                    }
                } else {
                    StoreError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?;
            debug!(session_id = %session, sequence, path = %path.display(), "Appended event");
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io {
            path: self.events_dir(session_id),
            source: io::Error::other(e),
        })?
    }

    async fn load_events(&self, session_id: &str) -> Result<Vec<Event>, StoreError> {
        validate_session_id(session_id)?;
        let dir = self.events_dir(session_id);
        let session = session_id.to_string();
        let join_dir = dir.clone();
        tokio::task::spawn_blocking(move || read_events(&dir, &session))
            .await
            .map_err(|e| StoreError::Io {
                path: join_dir,
                source: io::Error::other(e),
            })?
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError> {
        let base = self.base_dir.clone();
        tokio::task::spawn_blocking(move || {
            if !base.exists() {
                return Ok(Vec::new());
            }
            let mut ids: Vec<String> = std::fs::read_dir(&base)
                .map_err(io_err(&base))?
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().join("events").is_dir())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            ids.sort();
            Ok(ids)
        })
        .await
        .map_err(|e| StoreError::Io {
            path: self.base_dir.clone(),
            source: io::Error::other(e),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventError;
    use crate::events::{AnalysisStarted, EventPayload, ResearchCancelled};
    use tempfile::TempDir;

    fn event(session: &str, sequence: u64) -> Event {
        Event::new(
            session,
            sequence,
            EventPayload::AnalysisStarted(AnalysisStarted {
                total_facts: sequence as usize,
            }),
        )
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());

        for seq in 1..=12 {
            store.append("s1", &event("s1", seq)).await.unwrap();
        }

        let events = store.load_events("s1").await.unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=12).collect::<Vec<_>>());
        assert!(
            dir.path()
                .join("s1/events/000001_analysis_started.json")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_load_orders_by_sequence_past_six_digits() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        for seq in [1_000_000, 2, 999_999, 10_000_001] {
            store.append("s1", &event("s1", seq)).await.unwrap();
        }
        assert!(
            dir.path()
                .join("s1/events/1000000_analysis_started.json")
                .exists()
        );

        let events = store.load_events("s1").await.unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 999_999, 1_000_000, 10_000_001]);
    }

    #[tokio::test]
    async fn test_fractional_cost_survives_the_log() {
        use crate::aggregate::load_from_events;
        use crate::events::{PerspectivesDiscovered, ResearchStarted};
        use crate::types::{CostBreakdown, Perspective, TokenUsage};

        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        let cost = CostBreakdown::from_usage(
            &TokenUsage {
                input_tokens: 9507,
                output_tokens: 20174,
            },
            1.0,
            2.0,
        );
        let log = vec![
            Event::new(
                "s1",
                1,
                EventPayload::ResearchStarted(ResearchStarted {
                    query: "q".into(),
                    strategy: Default::default(),
                    settings: Default::default(),
                    parent_id: None,
                }),
            ),
            Event::new(
                "s1",
                2,
                EventPayload::PerspectivesDiscovered(PerspectivesDiscovered {
                    perspectives: vec![Perspective::new("A", "focus", vec![])],
                    survey_queries: vec![],
                    cost,
                }),
            ),
        ];
        for event in &log {
            store.append("s1", event).await.unwrap();
        }

        let live = load_from_events("s1", &log).unwrap();
        let replayed = load_from_events("s1", &store.load_events("s1").await.unwrap()).unwrap();
        assert_eq!(live.cost, cost);
        assert_eq!(replayed.cost, live.cost);
    }

    #[tokio::test]
    async fn test_load_unknown_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        let err = store.load_events("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        store.append("s1", &event("s1", 1)).await.unwrap();

        let other = Event::new(
            "s1",
            1,
            EventPayload::ResearchCancelled(ResearchCancelled {
                reason: "late writer".into(),
                cost: Default::default(),
            }),
        );
        let err = store.append("s1", &other).await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { sequence: 1, .. }));
        assert_eq!(store.load_events("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_session_ids_sorted() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        assert!(store.list_session_ids().await.unwrap().is_empty());

        store.append("2026-10-16-bbbb0000", &event("2026-10-16-bbbb0000", 1)).await.unwrap();
        store.append("2026-10-15-aaaa0000", &event("2026-10-15-aaaa0000", 1)).await.unwrap();
        std::fs::create_dir_all(dir.path().join("not-a-session")).unwrap();

        let ids = store.list_session_ids().await.unwrap();
        assert_eq!(ids, vec!["2026-10-15-aaaa0000", "2026-10-16-bbbb0000"]);
    }

    #[tokio::test]
    async fn test_unknown_record_type_fails_load() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        store.append("s1", &event("s1", 1)).await.unwrap();

        let bogus = serde_json::json!({
            "id": uuid::Uuid::new_v4(),
            "session_id": "s1",
            "sequence": 2,
            "timestamp": "2026-10-16T10:00:00Z",
            "type": "hologram.projected",
            "payload": {}
        });
        std::fs::write(
            dir.path().join("s1/events/000002_hologram_projected.json"),
            bogus.to_string(),
        )
        .unwrap();

        let err = store.load_events("s1").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode {
                source: EventError::UnknownType { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileEventStore::new(dir.path());
        let err = store.append("../escape", &event("../escape", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSessionId { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_different_sessions() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileEventStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("session-{}", i);
                for seq in 1..=5 {
                    store.append(&session, &event(&session, seq)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list_session_ids().await.unwrap().len(), 8);
        for i in 0..8 {
            let events = store.load_events(&format!("session-{}", i)).await.unwrap();
            assert_eq!(events.len(), 5);
        }
    }
}
