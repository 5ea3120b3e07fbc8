//! Progress reporting and cancellation support for sweeps.
//!
//! A sweep can take hours. These types let the caller follow it run by run
//! and stop it from another thread (e.g. a Ctrl-C handler).
//!
//! # Example
//!
//! ```rust,ignore
//! use topic_sweep::{CancellationToken, Sweep};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(3600));
//!     token_clone.cancel();
//! });
//!
//! let sweep = Sweep::builder()
//!     .config(config)
//!     .cancellation_token(token)
//!     .on_progress(|update| println!("[{:?}] {}", update.stage, update.message))
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    /// Checking preconditions and planning the grid
    Initializing,
    /// Building the corpus container
    Importing,
    /// Running the engine over the grid
    Training,
    /// Every grid point was visited
    Complete,
    /// Sweep was cancelled
    Cancelled,
    /// Sweep aborted on a fatal error
    Failed,
}

impl SweepStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Importing => "Importing Corpus",
            Self::Training => "Training Models",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }
}

/// One progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: SweepStage,

    /// Run identity the update refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Fraction of grid points finished (0.0 - 1.0)
    pub progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_finished: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_total: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(stage: SweepStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            run: None,
            progress: 0.0,
            message: message.into(),
            runs_finished: None,
            runs_total: None,
        }
    }

    /// Update about a single run, with the sweep-wide counters.
    pub fn with_run(
        run: impl Into<String>,
        finished: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let progress = if total > 0 {
            finished as f32 / total as f32
        } else {
            0.0
        };
        Self {
            stage: SweepStage::Training,
            run: Some(run.into()),
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            runs_finished: Some(finished),
            runs_total: Some(total),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            progress: 1.0,
            ..Self::new(SweepStage::Complete, message)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(SweepStage::Cancelled, "Sweep cancelled by user")
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(SweepStage::Failed, message)
    }
}

/// Trait for receiving progress updates during a sweep.
///
/// With parallelism enabled, updates arrive from worker threads, hence the
/// `Send + Sync` bound.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running sweep.
///
/// Clones share state. Once cancelled, in-flight engine processes are killed
/// at their next poll and no further grid point is started.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can drive another sweep.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        assert!(!token2.is_cancelled());

        token1.cancel();
        assert!(token2.is_cancelled());

        token2.reset();
        assert!(!token1.is_cancelled());
    }

    #[test]
    fn test_cancellation_across_threads() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            token_clone.is_cancelled()
        });

        token.cancel();
        assert!(handle.join().expect("thread should not panic"));
    }

    #[test]
    fn test_progress_with_run() {
        let update = ProgressUpdate::with_run("10tp-100it-50in", 1, 4, "done");
        assert_eq!(update.stage, SweepStage::Training);
        assert_eq!(update.run.as_deref(), Some("10tp-100it-50in"));
        assert_eq!(update.progress, 0.25);
        assert_eq!(update.runs_total, Some(4));
    }

    #[test]
    fn test_progress_with_zero_total() {
        let update = ProgressUpdate::with_run("x", 0, 0, "empty");
        assert_eq!(update.progress, 0.0);
    }

    #[test]
    fn test_closure_progress_reporter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let reporter = ClosureProgressReporter::new(move |_update| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        reporter.report(ProgressUpdate::new(SweepStage::Importing, "Importing"));
        reporter.report(ProgressUpdate::complete("Done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_json_values() {
        for (stage, expected) in [
            (SweepStage::Initializing, "\"initializing\""),
            (SweepStage::Importing, "\"importing\""),
            (SweepStage::Training, "\"training\""),
            (SweepStage::Complete, "\"complete\""),
            (SweepStage::Cancelled, "\"cancelled\""),
            (SweepStage::Failed, "\"failed\""),
        ] {
            assert_eq!(serde_json::to_string(&stage).unwrap(), expected);
        }
    }

    #[test]
    fn test_update_skips_empty_fields() {
        let json = serde_json::to_string(&ProgressUpdate::cancelled()).unwrap();
        assert!(!json.contains("runs_total"));
        assert!(json.contains("\"stage\":\"cancelled\""));
    }
}
