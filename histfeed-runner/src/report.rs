//! Run reports.
//!
//! A [`RunReport`] is the single artifact a run always produces, whatever
//! else happened: outcome, the accumulated [`RunLog`], and a fingerprinted
//! summary of the table that was (or already was) in storage. Reports render
//! to a notification subject/body and round-trip through schema-versioned
//! JSON for archiving.

use std::fmt;
use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use histfeed_core::dataset::{Dataset, DatasetError};
use histfeed_core::runlog::RunLog;

use crate::ingest::IngestionMode;

/// Bump on breaking changes to the exported JSON layout.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Shape and fingerprint of a persisted close table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub symbols: usize,
    pub start_date: String,
    pub end_date: String,
    /// blake3 hex digest of the CSV bytes in storage.
    pub content_hash: String,
}

/// Summarize a table together with its serialized bytes.
pub fn summarize(table: &Dataset, csv_bytes: &[u8]) -> Result<DatasetSummary, DatasetError> {
    let range = table.date_range()?;
    Ok(DatasetSummary {
        rows: table.rows(),
        symbols: table.symbol_count(),
        start_date: range.start.to_string(),
        end_date: range.end.to_string(),
        content_hash: blake3::hash(csv_bytes).to_hex().to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub outcome: RunOutcome,
    /// `None` when the run failed before the mode was determined.
    pub mode: Option<IngestionMode>,
    pub started_at: DateTime<Utc>,
    /// Whether this run wrote the table to storage.
    pub persisted: bool,
    pub error: Option<String>,
    pub dataset: Option<DatasetSummary>,
    pub log: RunLog,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Notification subject line.
    pub fn subject(&self, prefix: &str) -> String {
        match self.outcome {
            RunOutcome::Succeeded => format!("{prefix}: historical close data updated"),
            RunOutcome::Failed => format!("{prefix}: historical close ingestion failed"),
        }
    }

    /// Notification body: outcome, dataset shape, then the run log.
    pub fn body(&self) -> String {
        let mut out = String::new();
        if let Some(mode) = self.mode {
            let _ = writeln!(out, "mode:    {mode}");
        }
        let _ = writeln!(
            out,
            "started: {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out);
        match (&self.outcome, &self.error) {
            (RunOutcome::Succeeded, _) => {
                let _ = writeln!(out, "The run completed successfully.");
            }
            (RunOutcome::Failed, Some(error)) => {
                let _ = writeln!(out, "The run failed: {error}");
            }
            (RunOutcome::Failed, None) => {
                let _ = writeln!(out, "The run failed.");
            }
        }
        if let Some(dataset) = &self.dataset {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "dataset: {} rows x {} symbols, {} to {}",
                dataset.rows, dataset.symbols, dataset.start_date, dataset.end_date
            );
            let _ = writeln!(out, "blake3:  {}", dataset.content_hash);
            if !self.persisted {
                let _ = writeln!(out, "(the table in storage was left untouched)");
            }
        }
        if !self.log.infos.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "run notes:");
            for line in &self.log.infos {
                let _ = writeln!(out, "  - {line}");
            }
        }
        if !self.log.warnings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "issues observed during the run:");
            for line in &self.log.warnings {
                let _ = writeln!(out, "  - {line}");
            }
        }
        out
    }
}

/// Serialize a report to pretty JSON.
pub fn export_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serialize run report")
}

/// Parse a previously exported report, rejecting layouts newer than this
/// build understands.
pub fn import_json(json: &str) -> Result<RunReport> {
    let report: RunReport = serde_json::from_str(json).context("parse run report JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "run report schema version {} is newer than supported version {}",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}
