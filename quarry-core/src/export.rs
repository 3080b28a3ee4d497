//! Exporting sessions to files.

use crate::aggregate::{ResearchState, ResearchStatus};
use crate::error::{QuarryError, Result};
use crate::persistence::{atomic_write, atomic_write_json};
use crate::types::{
    AnalysisResult, CostBreakdown, Fact, Perspective, Report, Source, WorkerStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A self-contained snapshot of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchExport {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub query: String,
    pub strategy: WorkerStrategy,
    pub status: ResearchStatus,
    pub perspectives: Vec<Perspective>,
    pub facts: Vec<Fact>,
    pub sources: Vec<Source>,
    pub analysis: Option<AnalysisResult>,
    pub report: Option<Report>,
    pub cost: CostBreakdown,
    /// Sequence number of the last event included.
    pub version: u64,
    pub exported_at: DateTime<Utc>,
}

impl ResearchExport {
    pub fn from_state(state: &ResearchState) -> Self {
        Self {
            session_id: state.id.clone(),
            parent_id: state.parent_id.clone(),
            query: state.query.clone(),
            strategy: state.strategy,
            status: state.status,
            perspectives: state.perspectives.clone(),
            facts: state.all_facts(),
            sources: state.all_sources(),
            analysis: state.analysis.clone(),
            report: state.report.clone(),
            cost: state.cost,
            version: state.version,
            exported_at: Utc::now(),
        }
    }
}

/// Writes a session export somewhere and reports where.
pub trait Exporter: Send + Sync {
    fn export(&self, export: &ResearchExport) -> Result<PathBuf>;
}

/// One pretty-printed JSON file per session.
pub struct JsonExporter {
    output_dir: PathBuf,
}

impl JsonExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl Exporter for JsonExporter {
    fn export(&self, export: &ResearchExport) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}.json", export.session_id));
        atomic_write_json(&path, export)?;
        Ok(path)
    }
}

/// The compiled report as a markdown file.
pub struct MarkdownExporter {
    output_dir: PathBuf,
}

impl MarkdownExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl Exporter for MarkdownExporter {
    fn export(&self, export: &ResearchExport) -> Result<PathBuf> {
        let report = export.report.as_ref().ok_or_else(|| QuarryError::Research {
            message: format!("session {} has no report yet", export.session_id),
        })?;
        let path = self.output_dir.join(format!("{}.md", export.session_id));
        atomic_write(&path, report.full_content.as_bytes())?;
        Ok(path)
    }
}
