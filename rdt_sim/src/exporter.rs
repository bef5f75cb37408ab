//! JSON exporter for run reports.
//!
//! Writes a [`StatsContext`] (and optionally a packet trace) as one JSON
//! document for offline plotting.

use crate::stats::{RunReport, StatsContext, StatsTotals};
use crate::trace::TraceRecord;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario or sweep name
    pub name: String,

    /// Seed used
    pub seed: u64,

    /// Aggregates over `runs`
    pub totals: StatsTotals,

    /// One report per run
    pub runs: Vec<RunReport>,

    /// Packet trace of the last traced run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceRecord>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(name: &str, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            seed,
            totals: StatsTotals::default(),
            runs: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Builds an export from every run in `stats`.
    pub fn from_stats(name: &str, seed: u64, stats: &StatsContext) -> Self {
        Self {
            totals: stats.totals(),
            runs: stats.runs().to_vec(),
            ..Self::new(name, seed)
        }
    }

    /// Attaches a packet trace.
    pub fn with_trace(mut self, trace: Vec<TraceRecord>) -> Self {
        self.trace = trace;
        self
    }

    /// Adds a run and refreshes the totals.
    pub fn add_run(&mut self, report: RunReport) {
        self.runs.push(report);
        let mut stats = StatsContext::new();
        for run in &self.runs {
            stats.record(run.clone());
        }
        self.totals = stats.totals();
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
