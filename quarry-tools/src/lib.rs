//! # Quarry Tools
//!
//! Tools available to research agents: web search and page fetching.
//! Tools are registered in a [`ToolRegistry`], which the orchestrator uses
//! as its tool executor.

pub mod registry;
pub mod web;

use quarry_core::config::SearchConfig;
use registry::ToolRegistry;
use std::sync::Arc;
use tracing::warn;

pub use registry::{Tool, ToolDefinition};
pub use web::{BraveSearchTool, WebFetchTool};

/// Register the web tools into the given registry.
///
/// `fetch` is always available. `search` needs an API key in the configured
/// environment variable; without one it is skipped and search calls fail as
/// unknown tools, which agents record as gaps.
pub fn register_research_tools(registry: &mut ToolRegistry, config: &SearchConfig) {
    if let Err(e) = registry.register(Arc::new(WebFetchTool::from_config(config))) {
        warn!(error = %e, "Failed to register fetch tool");
    }
    match BraveSearchTool::from_config(config) {
        Some(search) => {
            if let Err(e) = registry.register(Arc::new(search)) {
                warn!(error = %e, "Failed to register search tool");
            }
        }
        None => warn!(
            env = %config.api_key_env,
            "No search API key set; web search is disabled"
        ),
    }
}

/// Create a registry with the research tools registered.
pub fn create_default_registry(config: &SearchConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_research_tools(&mut registry, config);
    registry
}
