//! In-memory event store for tests and throwaway runs.

use super::EventStore;
use crate::error::StoreError;
use crate::events::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Event store that keeps every session log in memory.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    sessions: RwLock<HashMap<String, Vec<Event>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every event after `keep` entries, simulating a crash mid-run.
    pub async fn truncate(&self, session_id: &str, keep: usize) {
        if let Some(events) = self.sessions.write().await.get_mut(session_id) {
            events.truncate(keep);
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, session_id: &str, event: &Event) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id.to_string()).or_default();
        if log.iter().any(|e| e.sequence == event.sequence) {
            return Err(StoreError::SequenceConflict {
                session_id: session_id.to_string(),
                sequence: event.sequence,
            });
        }
        log.push(event.clone());
        Ok(())
    }

    async fn load_events(&self, session_id: &str) -> Result<Vec<Event>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut events = sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
