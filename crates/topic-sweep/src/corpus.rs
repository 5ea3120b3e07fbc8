//! Corpus import.
//!
//! Turns a directory of plain-text documents into MALLET's binary corpus
//! container via `mallet import-dir`, keeping token sequences and removing
//! stopwords. The importer runs once per sweep; every training run then
//! reads the resulting [`Corpus`] without modifying it.
//!
//! # Existing output
//!
//! What happens when the container already exists is decided by
//! [`ExistingCorpusPolicy`]. With the default `Overwrite` policy the engine
//! writes to `<corpus>.partial` and the file is renamed over the old
//! container only after a successful import, so a failed or cancelled
//! import never leaves a half-written corpus behind.

use crate::config::ExistingCorpusPolicy;
use crate::error::{Result, SweepError};
use crate::invocation::InvocationBuilder;
use crate::process::{ProcessExecutor, ProcessOutcome};
use crate::sweep::CancellationToken;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens are runs of letters that may contain punctuation inside, so that
/// `aujourd'hui` and `peut-être` stay single tokens. Single letters are not
/// tokens.
pub const DEFAULT_TOKEN_PATTERN: &str = r"\p{L}[\p{L}\p{P}]*\p{L}";

static DEFAULT_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(DEFAULT_TOKEN_PATTERN).expect("default token pattern is valid")
});

/// The token-recognition pattern handed to the importer.
///
/// The pattern is compiled locally as well, which rejects malformed
/// patterns before any process starts and powers [`CorpusImporter::preview`].
#[derive(Debug, Clone)]
pub struct TokenRule {
    regex: Regex,
}

impl TokenRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            SweepError::InvalidConfig(format!("invalid token pattern {pattern:?}: {e}"))
        })?;
        Ok(Self { regex })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Iterate over the tokens of `text`.
    pub fn tokens<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.regex.find_iter(text).map(|m| m.as_str())
    }
}

impl Default for TokenRule {
    fn default() -> Self {
        Self {
            regex: DEFAULT_TOKEN_REGEX.clone(),
        }
    }
}

impl PartialEq for TokenRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern() == other.pattern()
    }
}

/// Inputs a corpus was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusProvenance {
    pub source_dir: PathBuf,
    pub stoplist: PathBuf,
    pub token_rule: TokenRule,
    pub document_count: usize,
}

/// An immutable, persisted corpus container.
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    path: PathBuf,
    provenance: Option<CorpusProvenance>,
}

impl Corpus {
    /// Open an existing container, e.g. for a train-only sweep.
    ///
    /// A missing or empty container is [`SweepError::InvalidInput`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let corpus = Self {
            path: path.into(),
            provenance: None,
        };
        corpus.verify()?;
        Ok(corpus)
    }

    /// Path of the container; this is the corpus's identity.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How the corpus was built, when it was built in this process.
    pub fn provenance(&self) -> Option<&CorpusProvenance> {
        self.provenance.as_ref()
    }

    /// Check that the container is still present and non-empty.
    pub fn verify(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(m) if m.is_file() && m.len() > 0 => Ok(()),
            Ok(_) => Err(SweepError::invalid_input(
                &self.path,
                "corpus container is empty or not a file",
            )),
            Err(e) => Err(SweepError::invalid_input(
                &self.path,
                format!("corpus container is not readable: {e}"),
            )),
        }
    }

    /// Refer to a container that may not exist yet (planning, dry runs).
    pub(crate) fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            provenance: None,
        }
    }
}

/// Local token statistics of a source directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusPreview {
    pub documents: usize,
    pub tokens: usize,
    pub stopwords_removed: usize,
    pub vocabulary: usize,
    /// Documents with no token left after stopword removal.
    pub empty_documents: Vec<PathBuf>,
}

/// Builds a [`Corpus`] with the external engine.
pub struct CorpusImporter {
    invocations: InvocationBuilder,
    executor: Arc<dyn ProcessExecutor>,
    output: PathBuf,
    policy: ExistingCorpusPolicy,
    cancellation_token: CancellationToken,
}

impl CorpusImporter {
    pub fn new(
        invocations: InvocationBuilder,
        executor: Arc<dyn ProcessExecutor>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            invocations,
            executor,
            output: output.into(),
            policy: ExistingCorpusPolicy::default(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn policy(mut self, policy: ExistingCorpusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Import `source_dir` into the configured container path.
    ///
    /// # Errors
    ///
    /// - [`SweepError::InvalidInput`] if the source directory has no readable
    ///   document, the stoplist cannot be read, or the container exists under
    ///   [`ExistingCorpusPolicy::Fail`]. No process is started in these cases.
    /// - [`SweepError::ImportFailure`] if the engine cannot be launched, exits
    ///   non-zero, or produces no container.
    /// - [`SweepError::Cancelled`] if cancellation interrupted the import.
    pub fn import(
        &self,
        source_dir: &Path,
        stoplist: &Path,
        token_rule: &TokenRule,
    ) -> Result<Corpus> {
        let documents = list_documents(source_dir)?;
        check_stoplist(stoplist)?;

        let provenance = CorpusProvenance {
            source_dir: source_dir.to_path_buf(),
            stoplist: stoplist.to_path_buf(),
            token_rule: token_rule.clone(),
            document_count: documents.len(),
        };

        if self.output.exists() {
            match self.policy {
                ExistingCorpusPolicy::Fail => {
                    return Err(SweepError::invalid_input(
                        &self.output,
                        "corpus container already exists (policy: fail)",
                    ));
                }
                ExistingCorpusPolicy::Reuse => {
                    let existing = Corpus {
                        path: self.output.clone(),
                        provenance: Some(provenance.clone()),
                    };
                    if existing.verify().is_ok() {
                        info!("Reusing existing corpus {}", self.output.display());
                        return Ok(existing);
                    }
                    warn!(
                        "Existing corpus {} is unusable, rebuilding it",
                        self.output.display()
                    );
                }
                ExistingCorpusPolicy::Overwrite => {
                    debug!("Corpus {} will be replaced", self.output.display());
                }
            }
        }

        if self.cancellation_token.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(&self.output);
        remove_if_exists(&partial)?;

        let invocation = self
            .invocations
            .import(source_dir, &partial, stoplist, token_rule);
        info!(
            "Importing {} documents from {}",
            documents.len(),
            source_dir.display()
        );
        debug!("{}", invocation);

        let execution = self
            .executor
            .execute(&invocation, None, &self.cancellation_token)
            .map_err(|e| {
                SweepError::ImportFailure(format!(
                    "cannot launch {}: {e}",
                    invocation.program().display()
                ))
            })?;

        match execution.outcome {
            ProcessOutcome::Exited { code: Some(0) } => {}
            ProcessOutcome::Cancelled => {
                remove_if_exists(&partial)?;
                return Err(SweepError::Cancelled);
            }
            other => {
                remove_if_exists(&partial)?;
                let log_hint = invocation
                    .log_file()
                    .map(|p| format!(" (see {})", p.display()))
                    .unwrap_or_default();
                return Err(SweepError::ImportFailure(format!(
                    "engine ended with {other:?}{log_hint}"
                )));
            }
        }

        if !fs::metadata(&partial).is_ok_and(|m| m.len() > 0) {
            return Err(SweepError::ImportFailure(format!(
                "engine exited successfully but wrote no corpus to {}",
                partial.display()
            )));
        }
        fs::rename(&partial, &self.output)?;

        info!(
            "Corpus written to {} in {:.1}s",
            self.output.display(),
            execution.duration.as_secs_f64()
        );
        Ok(Corpus {
            path: self.output.clone(),
            provenance: Some(provenance),
        })
    }

    /// Tokenize `source_dir` locally with `token_rule` and the stoplist,
    /// approximating what the engine will keep. Lowercases tokens before the
    /// stoplist lookup, as the engine does by default.
    pub fn preview(
        source_dir: &Path,
        stoplist: &Path,
        token_rule: &TokenRule,
    ) -> Result<CorpusPreview> {
        let documents = list_documents(source_dir)?;
        let stopwords = load_stoplist(stoplist)?;

        let mut preview = CorpusPreview {
            documents: documents.len(),
            ..CorpusPreview::default()
        };
        let mut vocabulary: HashSet<String> = HashSet::new();

        for doc in &documents {
            let bytes = fs::read(doc)?;
            let text = String::from_utf8_lossy(&bytes);
            let mut kept = 0usize;
            for token in token_rule.tokens(&text) {
                let token = token.to_lowercase();
                if stopwords.contains(&token) {
                    preview.stopwords_removed += 1;
                } else {
                    kept += 1;
                    vocabulary.insert(token);
                }
            }
            if kept == 0 {
                preview.empty_documents.push(doc.clone());
            }
            preview.tokens += kept;
        }

        preview.vocabulary = vocabulary.len();
        Ok(preview)
    }
}

/// Readable, non-hidden regular files directly inside `dir`, sorted.
fn list_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        SweepError::invalid_input(dir, format!("source directory is not readable: {e}"))
    })?;

    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match File::open(&path) {
            Ok(_) => documents.push(path),
            Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
        }
    }

    if documents.is_empty() {
        return Err(SweepError::invalid_input(
            dir,
            "source directory contains no readable documents",
        ));
    }
    documents.sort();
    Ok(documents)
}

fn check_stoplist(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(m) if m.is_file() => File::open(path).map(|_| ()).map_err(|e| {
            SweepError::invalid_input(path, format!("stoplist is not readable: {e}"))
        }),
        Ok(_) => Err(SweepError::invalid_input(path, "stoplist is not a file")),
        Err(e) => Err(SweepError::invalid_input(
            path,
            format!("stoplist is not readable: {e}"),
        )),
    }
}

/// Whitespace-separated, lowercased stopwords.
fn load_stoplist(path: &Path) -> Result<HashSet<String>> {
    check_stoplist(path)?;
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes)
        .split_whitespace()
        .map(str::to_lowercase)
        .collect())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
