//! Event store: the durable, append-only log behind every research session.
//!
//! The store is the only persistence the orchestrator needs; session state is
//! always rebuilt from `load_events` through the aggregate fold.

pub mod file;
pub mod memory;

use crate::error::StoreError;
use crate::events::Event;
use async_trait::async_trait;

pub use file::FileEventStore;
pub use memory::MemoryEventStore;

/// Append-only storage of research events keyed by session id.
///
/// Implementations must tolerate concurrent appends to different sessions.
/// Within one session the orchestrator is the only writer.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Durably append `event` to the session's log.
    ///
    /// Returns only after the event would survive a crash.
    async fn append(&self, session_id: &str, event: &Event) -> Result<(), StoreError>;

    /// Load every event of a session in append order.
    ///
    /// Returns `StoreError::NotFound` when the session has never been written.
    async fn load_events(&self, session_id: &str) -> Result<Vec<Event>, StoreError>;

    /// List the ids of every stored session, sorted.
    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Whether any event has been stored for the session.
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        match self.load_events(session_id).await {
            Ok(events) => Ok(!events.is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject ids that could escape the store's base directory.
pub(crate) fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId {
            session_id: session_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("2026-10-16-abcd1234").is_ok());
        assert!(validate_session_id("2026-10-16-abcd1234-v2").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
    }
}
