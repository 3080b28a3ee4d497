//! # Quarry Core
//!
//! Core library for Quarry, a multi-perspective research engine.
//! Provides the event-sourced session model (events, store, aggregate), the
//! research agents, the orchestrator that drives them, the LLM interface
//! (brain and providers), configuration, and export.

pub mod aggregate;
pub mod brain;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod session;
pub mod store;
pub mod tools;
pub mod types;

// Re-export commonly used types at the crate root.
pub use aggregate::{ResearchState, ResearchStatus, WorkerState, WorkerStatus, load_from_events};
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use bus::EventBus;
pub use config::{QuarryConfig, ResearchConfig, load_config};
pub use error::{QuarryError, Result};
pub use events::{Event, EventPayload};
pub use export::{Exporter, JsonExporter, MarkdownExporter, ResearchExport};
pub use orchestrator::{Orchestrator, ResearchRequest};
pub use store::{EventStore, FileEventStore, MemoryEventStore};
pub use tools::{MockToolExecutor, ToolExecutor};
pub use types::{
    CostBreakdown, Fact, Message, Perspective, Report, Source, TokenUsage, WorkerStrategy,
};
