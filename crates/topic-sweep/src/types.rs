use crate::grid::GridPoint;
use crate::identity::RunIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a single grid point ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// The engine ran and produced a complete artifact set.
    Success,
    /// A complete artifact set was already on disk; nothing was launched.
    AlreadyComplete,
    /// The engine could not be started or exited non-zero.
    ProcessFailure {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        message: String,
    },
    /// The engine exited 0 but some artifacts are missing or empty.
    IncompleteOutput { missing: Vec<PathBuf> },
    /// The artifacts exist but contradict the run parameters.
    CorruptOutput { reason: String },
    /// The wall-clock limit expired and the engine was killed.
    Timeout { limit_secs: u64 },
    /// Cancellation interrupted the run.
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyComplete)
    }

    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProcessFailure { .. }
                | Self::IncompleteOutput { .. }
                | Self::CorruptOutput { .. }
                | Self::Timeout { .. }
        )
    }

    /// Short label for human output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "ok",
            Self::AlreadyComplete => "skipped",
            Self::ProcessFailure { .. } => "failed",
            Self::IncompleteOutput { .. } => "incomplete",
            Self::CorruptOutput { .. } => "corrupt",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub identity: RunIdentity,
    pub point: GridPoint,
    pub status: RunStatus,
    /// Exit code of the last engine process, when it exited on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock time over all attempts.
    pub duration_ms: u64,
    /// Engine launches made for this point; 0 when it was already complete.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

/// Aggregate counts over a sweep's results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Grid points with a result.
    pub runs: usize,
    pub succeeded: usize,
    pub already_complete: usize,
    /// Crashes, incomplete and corrupt outputs. Timeouts are counted apart.
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Sum of per-run durations in milliseconds.
    pub duration_ms: u64,
}

impl SweepSummary {
    pub fn from_results(results: &[RunResult]) -> Self {
        let mut summary = Self {
            runs: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                RunStatus::Success => summary.succeeded += 1,
                RunStatus::AlreadyComplete => summary.already_complete += 1,
                RunStatus::Timeout { .. } => summary.timed_out += 1,
                RunStatus::Cancelled => summary.cancelled += 1,
                RunStatus::ProcessFailure { .. }
                | RunStatus::IncompleteOutput { .. }
                | RunStatus::CorruptOutput { .. } => summary.failed += 1,
            }
            summary.duration_ms += result.duration_ms;
        }
        summary
    }

    /// Runs that did not succeed, whatever the reason.
    pub fn unsuccessful(&self) -> usize {
        self.failed + self.timed_out + self.cancelled
    }

    /// True if any run failed, timed out or was cancelled.
    pub fn has_failures(&self) -> bool {
        self.unsuccessful() > 0
    }
}
