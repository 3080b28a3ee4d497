//! Configuration system for Quarry.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files live at
//! `~/.config/quarry/config.toml` and `<workspace>/.quarry/config.toml`.

use crate::error::ConfigError;
use crate::events::SessionSettings;
use crate::types::WorkerStrategy;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub export: ExportConfig,
}

/// Language model endpoint and pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier sent to the endpoint.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// OpenAI-compatible chat completions base URL.
    pub base_url: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Pricing override per 1M input tokens (USD); the model table is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost_per_million: Option<f64>,
    /// Pricing override per 1M output tokens (USD).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost_per_million: Option<f64>,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "alibaba/tongyi-deepresearch-30b-a3b".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            request_timeout_secs: 120,
            input_cost_per_million: None,
            output_cost_per_million: None,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "llm.temperature {} is outside 0.0..=2.0",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("llm.max_tokens is 0; every completion will be empty".to_string());
        }
        if !self.base_url.starts_with("http") {
            warnings.push(format!("llm.base_url '{}' is not an HTTP URL", self.base_url));
        }
        warnings
    }
}

/// Retry policy for transient language model failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Shape and limits of a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub strategy: WorkerStrategy,
    /// Workers running at the same time.
    pub max_workers: usize,
    /// Upper bound on discovered perspectives, baseline included.
    pub max_perspectives: usize,
    /// Interviewer turns per interrogation worker.
    pub max_turns: usize,
    /// Iterations per search-reason worker.
    pub max_iterations: usize,
    /// Results requested per search call.
    pub search_results: usize,
    /// Whole-session ceiling in seconds.
    pub timeout_secs: u64,
    /// Run a follow-up search for important knowledge gaps after analysis.
    pub gap_filling: bool,
    /// Minimum gap importance (0..1) that triggers gap filling.
    pub gap_importance_threshold: f64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            strategy: WorkerStrategy::Storm,
            max_workers: 5,
            max_perspectives: 6,
            max_turns: 4,
            max_iterations: 3,
            search_results: 5,
            timeout_secs: 30 * 60,
            gap_filling: false,
            gap_importance_threshold: 0.7,
        }
    }
}

impl ResearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Settings recorded in `research.started` for a new session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_workers: self.max_workers.max(1),
            timeout_secs: self.timeout_secs,
            gap_filling: self.gap_filling,
        }
    }
}

impl QuarryConfig {
    /// Reject settings a run cannot proceed with; return warnings for the rest.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".into(),
            });
        }
        if self.research.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "research.timeout_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.research.gap_importance_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "research.gap_importance_threshold".into(),
                message: format!(
                    "{} is outside 0.0..=1.0",
                    self.research.gap_importance_threshold
                ),
            });
        }
        let mut warnings = self.llm.validate();
        if self.research.max_perspectives < 2 {
            warnings.push("research.max_perspectives below 2 leaves only the baseline".into());
        }
        if self.research.max_workers == 0 {
            warnings.push("research.max_workers is 0; one worker will be used".into());
        }
        Ok(warnings)
    }
}

/// Location of the durable event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// The configured event directory, or `<data dir>/events`.
    pub fn resolve_event_dir(&self) -> PathBuf {
        self.event_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "quarry", "quarry")
                .map(|d| d.data_dir().join("events"))
                .unwrap_or_else(|| PathBuf::from(".quarry").join("events"))
        })
    }
}

/// Web search and fetch tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Characters kept from a fetched page.
    pub max_fetch_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "BRAVE_API_KEY".to_string(),
            timeout_secs: 15,
            max_fetch_chars: 20_000,
        }
    }
}

/// Where finished sessions are exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl ExportConfig {
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "quarry", "quarry")
                .map(|d| d.data_dir().join("exports"))
                .unwrap_or_else(|| PathBuf::from(".quarry").join("exports"))
        })
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration with layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&QuarryConfig>,
) -> Result<QuarryConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(QuarryConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".quarry").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (QUARRY_LLM__MODEL, QUARRY_RESEARCH__MAX_WORKERS, ...)
    figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write the default config into `<workspace>/.quarry/config.toml`.
///
/// Returns the path written. Existing files are left alone.
pub fn write_default_config(workspace: &Path) -> std::io::Result<PathBuf> {
    let dir = workspace.join(".quarry");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.toml");
    if !path.exists() {
        let toml = toml::to_string_pretty(&QuarryConfig::default()).map_err(std::io::Error::other)?;
        std::fs::write(&path, toml)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QuarryConfig::default();
        assert_eq!(config.llm.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.research.max_workers, 5);
        assert_eq!(config.research.max_turns, 4);
        assert_eq!(config.research.max_iterations, 3);
        assert_eq!(config.research.timeout(), Duration::from_secs(1800));
        assert_eq!(config.search.api_key_env, "BRAVE_API_KEY");
        assert!(config.llm.validate().is_empty());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = QuarryConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: QuarryConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: QuarryConfig = toml::from_str(
            r#"
[research]
strategy = "react"
max_workers = 2
"#,
        )
        .unwrap();
        assert_eq!(parsed.research.strategy, WorkerStrategy::React);
        assert_eq!(parsed.research.max_workers, 2);
        assert_eq!(parsed.research.max_turns, 4);
        assert_eq!(parsed.llm, LlmConfig::default());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = QuarryConfig::default();
        overrides.llm.model = "openai/gpt-4o-mini".to_string();
        overrides.research.gap_filling = true;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert!(config.research.gap_filling);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let quarry_dir = dir.path().join(".quarry");
        std::fs::create_dir_all(&quarry_dir).unwrap();
        std::fs::write(
            quarry_dir.join("config.toml"),
            r#"
[research]
max_turns = 2
timeout_secs = 60

[store]
event_dir = "/tmp/quarry-events"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.research.max_turns, 2);
        assert_eq!(config.research.timeout_secs, 60);
        assert_eq!(
            config.store.resolve_event_dir(),
            PathBuf::from("/tmp/quarry-events")
        );
    }

    #[test]
    fn test_write_default_config_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_default_config(dir.path()).unwrap();
        std::fs::write(&path, "[research]\nmax_workers = 9\n").unwrap();
        write_default_config(dir.path()).unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.research.max_workers, 9);
    }

    #[test]
    fn test_session_settings_floor_workers() {
        let research = ResearchConfig {
            max_workers: 0,
            ..ResearchConfig::default()
        };
        assert_eq!(research.session_settings().max_workers, 1);
    }

    #[test]
    fn test_validate_rejects_bad_research_values() {
        let mut config = QuarryConfig::default();
        assert!(config.validate().unwrap().is_empty());

        config.research.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.research.timeout_secs = 10;
        config.research.gap_importance_threshold = 1.5;
        assert!(config.validate().is_err());

        config.research.gap_importance_threshold = 0.5;
        config.llm.model = " ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_warnings() {
        let llm = LlmConfig {
            temperature: 3.5,
            max_tokens: 0,
            base_url: "openrouter".into(),
            ..LlmConfig::default()
        };
        assert_eq!(llm.validate().len(), 3);
    }
}
