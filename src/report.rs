use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{ExtractionMethod, ExtractionResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    pub generated_at: DateTime<Utc>,
    pub source_file: String,
    pub method: ExtractionMethod,
    pub result: ExtractionResult,
}

impl ExtractionReport {
    pub fn new(source_file: impl Into<String>, method: ExtractionMethod, result: ExtractionResult) -> Self {
        Self {
            generated_at: Utc::now(),
            source_file: source_file.into(),
            method,
            result,
        }
    }
}

/// Writes `<prefix>-results-<unix-millis>.json` into `dir`, creating it if needed.
pub fn write_report(dir: impl AsRef<Path>, prefix: &str, report: &ExtractionReport) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    let path = dir.join(format!(
        "{}-results-{}.json",
        prefix,
        report.generated_at.timestamp_millis()
    ));
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(&path, json).with_context(|| format!("Failed to write report {}", path.display()))?;

    info!(path = %path.display(), "Report written");
    Ok(path)
}
