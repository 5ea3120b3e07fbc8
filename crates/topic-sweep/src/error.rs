//! Error types for the sweep orchestrator.
//!
//! [`SweepError`] covers the *fatal* failures: anything that aborts a sweep
//! before (or instead of) running the grid. Failures of a single grid point
//! are not errors at this level; they are recorded in that run's
//! [`RunStatus`](crate::types::RunStatus) and the sweep carries on.
//!
//! Errors are serializable as `{code, message}` so they can be embedded in
//! the JSON output of the CLI.

use serde::Serialize;
use serde::ser::SerializeStruct;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the sweep orchestrator.
#[derive(Error, Debug)]
pub enum SweepError {
    /// The sweep was cancelled before it could start.
    #[error("Sweep cancelled")]
    Cancelled,

    /// A precondition on an input directory or file was violated.
    #[error("Invalid input '{}': {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    /// The corpus import process failed; the sweep cannot proceed.
    #[error("Corpus import failed: {0}")]
    ImportFailure(String),

    /// Two distinct grid points would write to the same artifact names.
    #[error("Ambiguous run identity '{identity}': grid points {first} and {second} collide")]
    AmbiguousIdentity {
        identity: String,
        first: String,
        second: String,
    },

    /// Requested parallelism would oversubscribe the host CPUs.
    #[error(
        "Resource overcommit: {parallelism} concurrent runs x {threads_per_run} threads \
         exceeds {available_cpus} available CPUs"
    )]
    ResourceOvercommit {
        parallelism: usize,
        threads_per_run: usize,
        available_cpus: usize,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SweepError>,
    },
}

impl SweepError {
    /// Shorthand for an [`InvalidInput`](Self::InvalidInput) error.
    pub fn invalid_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SweepError::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SweepError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for machine-readable output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::ImportFailure(_) => "IMPORT_FAILURE",
            Self::AmbiguousIdentity { .. } => "AMBIGUOUS_IDENTITY",
            Self::ResourceOvercommit { .. } => "RESOURCE_OVERCOMMIT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<crate::config::ConfigValidationError> for SweepError {
    fn from(err: crate::config::ConfigValidationError) -> Self {
        SweepError::InvalidConfig(err.to_string())
    }
}

impl Serialize for SweepError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("SweepError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for sweep operations.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SweepError::Io(e).with_context(context))
    }
}
