//! Persisting sweep results.
//!
//! Every finished run is appended to a JSON-lines log as soon as it is
//! known, so a sweep that dies half-way still leaves a record of what it
//! did. At the end the CLI writes a pretty-printed summary next to it.

use crate::error::{Result, ResultExt};
use crate::types::{RunResult, SweepSummary};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the per-run log inside the model directory.
pub const RESULT_LOG_FILE: &str = "sweep-results.jsonl";

/// File name of the final summary inside the model directory.
pub const SUMMARY_FILE: &str = "sweep-summary.json";

/// Append-only JSON-lines log of [`RunResult`]s.
///
/// Shared between worker threads; each line is written under a lock.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ResultLog {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Creating result log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Opening result log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, result: &RunResult) -> Result<()> {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read back every result in the log.
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<RunResult>> {
        let raw = fs::read_to_string(path.as_ref())?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

/// Final sweep report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub summary: SweepSummary,
    pub results: Vec<RunResult>,
}

impl SweepReport {
    pub fn new(results: Vec<RunResult>) -> Self {
        Self {
            summary: SweepSummary::from_results(&results),
            results,
        }
    }

    /// Write the report as pretty JSON to `<dir>/sweep-summary.json`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let report_path = dir.join(SUMMARY_FILE);
        let mut file = File::create(&report_path)?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;

        info!("Report saved: {}", report_path.display());

        Ok(report_path)
    }
}
