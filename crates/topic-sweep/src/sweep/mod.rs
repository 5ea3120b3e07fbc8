//! Sweep module.
//!
//! This module provides the grid orchestrator and its progress and
//! cancellation plumbing.

mod orchestrator;
pub mod progress;

pub use orchestrator::{PlannedRun, Sweep, SweepBuilder, SweepRun};
pub use progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, SweepStage,
};
