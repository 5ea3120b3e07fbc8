//! Configuration types for the sweep orchestrator.
//!
//! [`SweepConfig`] is immutable once built and is handed to every component
//! at construction time. It can be assembled with the fluent
//! [`SweepConfigBuilder`] or loaded from a JSON file.

use crate::corpus::DEFAULT_TOKEN_PATTERN;
use crate::error::{Result, ResultExt};
use crate::grid::{GridPoint, HyperparameterGrid};
use crate::identity::{RunArtifactSet, RunIdentity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the importer does when the corpus container already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExistingCorpusPolicy {
    /// Rebuild it; the new container replaces the old one only on success.
    #[default]
    Overwrite,
    /// Keep the existing container and skip the import.
    Reuse,
    /// Refuse to run.
    Fail,
}

/// Parameters that are constant across every run of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedParams {
    /// Words listed per topic in the topic-keys file.
    pub num_top_words: u32,
    /// Sampler threads per engine process.
    pub num_threads: u32,
    /// Directory receiving all run artifacts.
    pub output_dir: PathBuf,
    /// Also write the per-run diagnostics XML.
    pub diagnostics: bool,
}

impl FixedParams {
    /// Artifact paths for one run under `output_dir`.
    pub fn artifact_set(&self, identity: &RunIdentity, point: &GridPoint) -> RunArtifactSet {
        RunArtifactSet::new(&self.output_dir, identity, point.topics(), self.diagnostics)
    }
}

/// Configuration for a sweep.
///
/// # Example
///
/// ```rust,ignore
/// use topic_sweep::SweepConfig;
///
/// let config = SweepConfig::builder()
///     .engine_path("/opt/mallet/bin/mallet")
///     .text_dir("5_substituted")
///     .model_dir("6_mallet")
///     .num_topics(vec![50, 100])
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Path to the MALLET launcher.
    /// Default: "mallet"
    pub engine_path: PathBuf,

    /// Directory of plain-text documents to import.
    /// Default: "texts"
    pub text_dir: PathBuf,

    /// Corpus container written by the import step.
    /// Default: "mallet/corpus.mallet"
    pub corpus_file: PathBuf,

    /// Directory receiving the per-run artifacts.
    /// Default: "mallet"
    pub model_dir: PathBuf,

    /// Stopword list applied during import.
    /// Default: "stoplist.txt"
    pub stoplist: PathBuf,

    /// Token-recognition pattern handed to the importer.
    /// Default: letters, optionally with inner punctuation.
    pub token_pattern: String,

    /// Topic counts to sweep over.
    pub num_topics: Vec<u64>,

    /// Iteration counts to sweep over.
    pub num_iterations: Vec<u64>,

    /// Optimize intervals to sweep over.
    pub optimize_intervals: Vec<u64>,

    /// Default: 100
    pub num_top_words: u32,

    /// Default: 4
    pub num_threads: u32,

    /// Maximum number of engine processes running at once.
    /// Default: 1
    pub parallelism: usize,

    /// Wall-clock limit per engine process, in seconds.
    /// Default: None
    pub timeout_secs: Option<u64>,

    /// Extra attempts for a run that failed in a retryable way.
    /// Default: 0
    pub retries: u32,

    /// Write the diagnostics XML for every run.
    /// Default: false
    pub diagnostics: bool,

    /// Default: Overwrite
    pub corpus_policy: ExistingCorpusPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("mallet"),
            text_dir: PathBuf::from("texts"),
            corpus_file: PathBuf::from("mallet/corpus.mallet"),
            model_dir: PathBuf::from("mallet"),
            stoplist: PathBuf::from("stoplist.txt"),
            token_pattern: DEFAULT_TOKEN_PATTERN.to_string(),
            num_topics: vec![250],
            num_iterations: vec![5000],
            optimize_intervals: vec![100],
            num_top_words: 100,
            num_threads: 4,
            parallelism: 1,
            timeout_secs: None,
            retries: 0,
            diagnostics: false,
            corpus_policy: ExistingCorpusPolicy::default(),
        }
    }
}

impl SweepConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .context(format!("Reading config file {}", path.display()))?;
        let config: SweepConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        for (field, values) in [
            ("num_topics", &self.num_topics),
            ("num_iterations", &self.num_iterations),
            ("optimize_intervals", &self.optimize_intervals),
        ] {
            if values.is_empty() {
                return Err(ConfigValidationError::EmptyDimension(field.to_string()));
            }
        }

        if self.num_topics.contains(&0) {
            return Err(ConfigValidationError::ZeroValue("num_topics".to_string()));
        }
        if self.num_iterations.contains(&0) {
            return Err(ConfigValidationError::ZeroValue("num_iterations".to_string()));
        }
        if self.num_top_words == 0 {
            return Err(ConfigValidationError::ZeroValue("num_top_words".to_string()));
        }
        if self.num_threads == 0 {
            return Err(ConfigValidationError::ZeroValue("num_threads".to_string()));
        }
        if self.parallelism == 0 {
            return Err(ConfigValidationError::ZeroValue("parallelism".to_string()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigValidationError::ZeroValue("timeout_secs".to_string()));
        }
        if self.token_pattern.trim().is_empty() {
            return Err(ConfigValidationError::EmptyTokenPattern);
        }

        Ok(())
    }

    /// The three-axis grid described by this configuration.
    pub fn grid(&self) -> Result<HyperparameterGrid> {
        HyperparameterGrid::standard(
            &self.num_topics,
            &self.num_iterations,
            &self.optimize_intervals,
        )
    }

    pub fn fixed_params(&self) -> FixedParams {
        FixedParams {
            num_top_words: self.num_top_words,
            num_threads: self.num_threads,
            output_dir: self.model_dir.clone(),
            diagnostics: self.diagnostics,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("'{0}' must list at least one value")]
    EmptyDimension(String),

    #[error("'{0}' must be at least 1")]
    ZeroValue(String),

    #[error("token pattern must not be empty")]
    EmptyTokenPattern,
}

/// Builder for [`SweepConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct SweepConfigBuilder {
    base: Option<SweepConfig>,
    engine_path: Option<PathBuf>,
    text_dir: Option<PathBuf>,
    corpus_file: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    stoplist: Option<PathBuf>,
    token_pattern: Option<String>,
    num_topics: Option<Vec<u64>>,
    num_iterations: Option<Vec<u64>>,
    optimize_intervals: Option<Vec<u64>>,
    num_top_words: Option<u32>,
    num_threads: Option<u32>,
    parallelism: Option<usize>,
    timeout_secs: Option<u64>,
    retries: Option<u32>,
    diagnostics: Option<bool>,
    corpus_policy: Option<ExistingCorpusPolicy>,
}

impl SweepConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from a file)
    /// instead of the defaults. Setters called afterwards override it.
    pub fn base(mut self, config: SweepConfig) -> Self {
        self.base = Some(config);
        self
    }

    pub fn engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    pub fn text_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.text_dir = Some(path.into());
        self
    }

    pub fn corpus_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.corpus_file = Some(path.into());
        self
    }

    pub fn model_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(path.into());
        self
    }

    pub fn stoplist(mut self, path: impl Into<PathBuf>) -> Self {
        self.stoplist = Some(path.into());
        self
    }

    pub fn token_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.token_pattern = Some(pattern.into());
        self
    }

    pub fn num_topics(mut self, values: Vec<u64>) -> Self {
        self.num_topics = Some(values);
        self
    }

    pub fn num_iterations(mut self, values: Vec<u64>) -> Self {
        self.num_iterations = Some(values);
        self
    }

    pub fn optimize_intervals(mut self, values: Vec<u64>) -> Self {
        self.optimize_intervals = Some(values);
        self
    }

    pub fn num_top_words(mut self, n: u32) -> Self {
        self.num_top_words = Some(n);
        self
    }

    pub fn num_threads(mut self, n: u32) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Run up to `k` engine processes at once.
    pub fn parallelism(mut self, k: usize) -> Self {
        self.parallelism = Some(k);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.retries = Some(n);
        self
    }

    pub fn diagnostics(mut self, enable: bool) -> Self {
        self.diagnostics = Some(enable);
        self
    }

    pub fn corpus_policy(mut self, policy: ExistingCorpusPolicy) -> Self {
        self.corpus_policy = Some(policy);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `SweepConfig` or an error if validation fails.
    pub fn build(self) -> std::result::Result<SweepConfig, ConfigValidationError> {
        let base = self.base.unwrap_or_default();
        let config = SweepConfig {
            engine_path: self.engine_path.unwrap_or(base.engine_path),
            text_dir: self.text_dir.unwrap_or(base.text_dir),
            corpus_file: self.corpus_file.unwrap_or(base.corpus_file),
            model_dir: self.model_dir.unwrap_or(base.model_dir),
            stoplist: self.stoplist.unwrap_or(base.stoplist),
            token_pattern: self.token_pattern.unwrap_or(base.token_pattern),
            num_topics: self.num_topics.unwrap_or(base.num_topics),
            num_iterations: self.num_iterations.unwrap_or(base.num_iterations),
            optimize_intervals: self.optimize_intervals.unwrap_or(base.optimize_intervals),
            num_top_words: self.num_top_words.unwrap_or(base.num_top_words),
            num_threads: self.num_threads.unwrap_or(base.num_threads),
            parallelism: self.parallelism.unwrap_or(base.parallelism),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            retries: self.retries.unwrap_or(base.retries),
            diagnostics: self.diagnostics.unwrap_or(base.diagnostics),
            corpus_policy: self.corpus_policy.unwrap_or(base.corpus_policy),
        };

        config.validate()?;
        Ok(config)
    }
}
