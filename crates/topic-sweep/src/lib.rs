//! Topic Sweep Library
//!
//! Drives the MALLET topic-model trainer over a grid of hyperparameters.
//!
//! # Overview
//!
//! - **Corpus Import**: builds the binary corpus container once from a
//!   directory of plain-text documents and a stoplist
//! - **Run Identities**: every grid point gets a unique, file-name-safe name
//!   such as `250tp-5000it-100in` that namespaces its output files
//! - **Structured Invocations**: engine calls are argument vectors, never
//!   shell text
//! - **Resumable Sweeps**: points whose artifacts already validate as complete
//!   are skipped, so an interrupted sweep can be started again
//! - **Artifact Validation**: a zero exit status is not trusted on its own;
//!   every expected file must be present and consistent
//! - **Progress Reporting**: per-run progress updates with cancellation support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use topic_sweep::{Sweep, SweepConfig, CancellationToken};
//!
//! let config = SweepConfig::builder()
//!     .engine_path("/opt/mallet/bin/mallet")
//!     .text_dir("5_substituted")
//!     .model_dir("6_mallet")
//!     .corpus_file("6_mallet/corpus.mallet")
//!     .stoplist("extras/fr_stopwords_project.txt")
//!     .num_topics(vec![50, 100, 250])
//!     .num_iterations(vec![5000])
//!     .optimize_intervals(vec![100])
//!     .build()?;
//!
//! let token = CancellationToken::new();
//! let sweep = Sweep::builder()
//!     .config(config)
//!     .cancellation_token(token.clone())
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?;
//!
//! let corpus = sweep.import_corpus()?;
//! let results: Vec<_> = sweep.run(&corpus)?.collect();
//!
//! let summary = SweepSummary::from_results(&results);
//! println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//! ```
//!
//! # Custom grids
//!
//! The configuration describes the classic three axes. Any other engine
//! option can be swept by building a [`HyperparameterGrid`] from
//! [`Dimension`]s and handing it to [`SweepBuilder::grid`]:
//!
//! ```rust,ignore
//! use topic_sweep::{Dimension, HyperparameterGrid};
//!
//! let grid = HyperparameterGrid::new(vec![
//!     Dimension::topics(&[50, 100]),
//!     Dimension::new("alpha", "--alpha", "a", vec![1.0.into(), 5.0.into()]),
//! ])?;
//! ```

pub mod config;
pub mod corpus;
pub mod error;
pub mod grid;
pub mod identity;
pub mod invocation;
pub mod process;
pub mod report;
pub mod sweep;
pub mod types;
pub mod validator;

// Re-exports for convenient access
pub use config::{
    ConfigValidationError, ExistingCorpusPolicy, FixedParams, SweepConfig, SweepConfigBuilder,
};
pub use corpus::{Corpus, CorpusImporter, CorpusPreview, CorpusProvenance, TokenRule};
pub use error::{Result as SweepResult, ResultExt, SweepError};
pub use grid::{Coordinate, Dimension, GridPoint, HyperparameterGrid, ParamValue};
pub use identity::{ArtifactKind, RunArtifactSet, RunIdentity, derive_all, derive_identity};
pub use invocation::{InvocationBuilder, ProcessInvocation};
pub use process::{ClosureExecutor, Execution, ProcessExecutor, ProcessOutcome, SystemExecutor};
pub use report::{ResultLog, SweepReport};
pub use sweep::{
    CancellationToken, ClosureProgressReporter, PlannedRun, ProgressReporter, ProgressUpdate,
    Sweep, SweepBuilder, SweepRun, SweepStage,
};
pub use types::{RunResult, RunStatus, SweepSummary};
pub use validator::{ArtifactValidator, ValidationVerdict};
