//! TOML report describing one batch run, written with `--metadata`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::model_access::ModelOrigin;
use crate::model_processing::{FileOutcome, RunSummary};
use crate::onnx_session::ModelInfo;
use crate::output_manager::make_path_relative_to_toml;

/// Written into the output directory of the run it describes
pub const REPORT_FILE_NAME: &str = "nexis-run.toml";

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub command: String,
    pub tool_version: String,
    pub command_line: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: toml::Value,
    pub model: ModelSection,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ModelSection {
    pub origin: ModelOrigin,
    #[serde(flatten)]
    pub info: ModelInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn build<C: Serialize>(
        command: &str,
        config: &C,
        model: &ModelInfo,
        origin: ModelOrigin,
        started_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<Self> {
        let config = toml::Value::try_from(config).context("Failed to serialize run config")?;
        Ok(Self {
            command: command.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            command_line: std::env::args().collect(),
            started_at,
            finished_at: Utc::now(),
            config,
            model: ModelSection {
                origin,
                info: model.clone(),
            },
            totals: Totals {
                written: summary.written(),
                skipped: summary.skipped(),
                failed: summary.failed(),
            },
            files: summary.outcomes.clone(),
        })
    }

    /// Paths in the `files` table are made relative to the report location
    fn relativize(&mut self, report_path: &Path) {
        let rel = |p: &PathBuf| PathBuf::from(make_path_relative_to_toml(p, report_path));
        for outcome in &mut self.files {
            match outcome {
                FileOutcome::Written { input, output } => {
                    *input = rel(input);
                    *output = rel(output);
                }
                FileOutcome::Skipped { path, .. } | FileOutcome::Failed { path, .. } => {
                    *path = rel(path);
                }
            }
        }
    }

    /// Write the report into `output_dir` and return its path
    pub fn save(mut self, output_dir: &Path) -> Result<PathBuf> {
        let report_path = output_dir.join(REPORT_FILE_NAME);
        self.relativize(&report_path);
        let text = toml::to_string_pretty(&self).context("Failed to serialize run report")?;
        std::fs::write(&report_path, text)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;
        Ok(report_path)
    }
}
