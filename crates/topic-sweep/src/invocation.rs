//! Structured engine invocations.
//!
//! Every engine call is a program path plus a vector of discrete arguments.
//! Nothing is ever joined into shell text: paths with spaces, quotes or `;`
//! reach the engine as single, untouched arguments. The [`Display`] impl of
//! [`ProcessInvocation`] quotes arguments for humans (logs, `--dry-run`)
//! and is never executed.
//!
//! [`Display`]: std::fmt::Display

use crate::config::FixedParams;
use crate::corpus::{Corpus, TokenRule};
use crate::error::{Result, SweepError};
use crate::grid::{Dimension, GridPoint};
use crate::identity::RunIdentity;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A fully specified external process call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    program: PathBuf,
    args: Vec<OsString>,
    log_file: Option<PathBuf>,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append a flag followed by its value.
    pub fn flag(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Send the process's stdout and stderr to `path`.
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Value following `flag`, if the flag is present.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Build a [`Command`] with stdin closed. Output redirection is left to
    /// the executor.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }
}

impl fmt::Display for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_quote(self.program.as_os_str()))?;
        for arg in &self.args {
            write!(f, " {}", display_quote(arg))?;
        }
        Ok(())
    }
}

fn display_quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if plain {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Translates sweep inputs into engine invocations.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    engine: PathBuf,
    dimensions: Vec<Dimension>,
}

impl InvocationBuilder {
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            dimensions: Vec::new(),
        }
    }

    /// Register the grid dimensions whose flags [`train`](Self::train) maps.
    pub fn with_dimensions(mut self, dimensions: &[Dimension]) -> Self {
        self.dimensions = dimensions.to_vec();
        self
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// `import-dir` call turning `source_dir` into the container at `output`.
    pub fn import(
        &self,
        source_dir: &Path,
        output: &Path,
        stoplist: &Path,
        token_rule: &TokenRule,
    ) -> ProcessInvocation {
        let log_dir = output.parent().unwrap_or(Path::new(".")).join("logs");
        ProcessInvocation::new(&self.engine)
            .arg("import-dir")
            .flag("--input", source_dir)
            .flag("--output", output)
            .arg("--keep-sequence")
            .flag("--token-regex", token_rule.pattern())
            .flag("--remove-stopwords", "TRUE")
            .flag("--stoplist-file", stoplist)
            .log_to(log_dir.join("import.log"))
    }

    /// `train-topics` call for one grid point.
    ///
    /// Each dimension value goes to its flag; each artifact goes to its
    /// identity-namespaced path under `fixed.output_dir`.
    pub fn train(
        &self,
        corpus: &Corpus,
        identity: &RunIdentity,
        point: &GridPoint,
        fixed: &FixedParams,
    ) -> Result<ProcessInvocation> {
        let mut inv = ProcessInvocation::new(&self.engine)
            .arg("train-topics")
            .flag("--input", corpus.path());

        for coordinate in point.coordinates() {
            let dim = self
                .dimensions
                .iter()
                .find(|d| d.name == coordinate.dimension)
                .ok_or_else(|| {
                    SweepError::InvalidConfig(format!(
                        "no engine flag registered for dimension '{}'",
                        coordinate.dimension
                    ))
                })?;
            inv = inv.flag(&dim.flag, coordinate.value.to_string());
        }

        inv = inv.flag("--num-top-words", fixed.num_top_words.to_string());

        let artifacts = fixed.artifact_set(identity, point);
        for (kind, path) in artifacts.artifacts() {
            inv = inv.flag(kind.flag(), path);
        }

        if let Some(topics) = point.topics() {
            inv = inv.flag("--doc-topics-max", topics.to_string());
        }

        Ok(inv
            .flag("--num-threads", fixed.num_threads.to_string())
            .log_to(fixed.output_dir.join("logs").join(format!("{identity}.log"))))
    }
}
