//! Run identities and the artifact paths they own.
//!
//! A [`RunIdentity`] renders each value of a grid point as
//! `{value}{suffix}` and joins the pieces with `-` in dimension order:
//!
//! ```text
//! topics=10, iterations=100, optimize_interval=50  ->  10tp-100it-50in
//! ```
//!
//! Every artifact file of a run embeds its identity, so identities must be
//! unique across a grid. [`derive_all`] checks this up front and refuses to
//! plan a sweep whose formatting would alias two points.

use crate::error::{Result, SweepError};
use crate::grid::{Dimension, GridPoint, HyperparameterGrid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Canonical, file-name-safe name of one grid point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunIdentity(String);

impl RunIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identity of `point`, rendering dimensions in `dimensions` order.
///
/// Pure: performs no I/O. Fails only if the point lacks one of the
/// dimensions or a value cannot be used inside a file name.
pub fn derive_identity(point: &GridPoint, dimensions: &[Dimension]) -> Result<RunIdentity> {
    let mut parts = Vec::with_capacity(dimensions.len());
    for dim in dimensions {
        let value = point.get(&dim.name).ok_or_else(|| {
            SweepError::InvalidConfig(format!("grid point {point} has no '{}' value", dim.name))
        })?;
        let rendered = value.to_string();
        if rendered.is_empty() || rendered.contains(['/', '\\', '\0']) {
            return Err(SweepError::InvalidConfig(format!(
                "value {rendered:?} of dimension '{}' cannot be used in a file name",
                dim.name
            )));
        }
        parts.push(format!("{rendered}{}", dim.suffix));
    }
    Ok(RunIdentity(parts.join("-")))
}

/// Enumerate the grid and derive every identity, rejecting aliases.
///
/// Returns the points in visiting order paired with their identities, or
/// [`SweepError::AmbiguousIdentity`] naming the first two colliding points.
pub fn derive_all(grid: &HyperparameterGrid) -> Result<Vec<(GridPoint, RunIdentity)>> {
    let mut planned: Vec<(GridPoint, RunIdentity)> = Vec::with_capacity(grid.size());
    let mut seen: HashMap<RunIdentity, usize> = HashMap::with_capacity(grid.size());

    for point in grid.points() {
        let identity = derive_identity(&point, grid.dimensions())?;
        if let Some(&first) = seen.get(&identity) {
            return Err(SweepError::AmbiguousIdentity {
                identity: identity.to_string(),
                first: planned[first].0.to_string(),
                second: point.to_string(),
            });
        }
        seen.insert(identity.clone(), planned.len());
        planned.push((point, identity));
    }

    Ok(planned)
}

/// The kinds of files one training run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    WordTopicCounts,
    TopicWordWeights,
    TopicKeys,
    DocTopics,
    TopicState,
    Diagnostics,
}

impl ArtifactKind {
    /// Artifacts every run writes.
    pub const REQUIRED: [ArtifactKind; 5] = [
        Self::WordTopicCounts,
        Self::TopicWordWeights,
        Self::TopicKeys,
        Self::DocTopics,
        Self::TopicState,
    ];

    /// Engine flag that receives this artifact's path.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::WordTopicCounts => "--word-topic-counts-file",
            Self::TopicWordWeights => "--topic-word-weights-file",
            Self::TopicKeys => "--output-topic-keys",
            Self::DocTopics => "--output-doc-topics",
            Self::TopicState => "--output-state",
            Self::Diagnostics => "--diagnostics-file",
        }
    }

    /// File name of this artifact for `identity`.
    pub fn file_name(&self, identity: &RunIdentity) -> String {
        match self {
            Self::WordTopicCounts => format!("words-by-topics_{identity}.txt"),
            Self::TopicWordWeights => format!("word-weights_{identity}.csv"),
            Self::TopicKeys => format!("topics-with-words_{identity}.csv"),
            Self::DocTopics => format!("topics-in-texts_{identity}.csv"),
            Self::TopicState => format!("topic_state_{identity}.gz"),
            Self::Diagnostics => format!("diagnostics_{identity}.xml"),
        }
    }
}

/// The output files owned by one run identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifactSet {
    pub identity: RunIdentity,
    /// Topic count the run was asked for; used to spot corrupt outputs.
    pub expected_topics: Option<u64>,
    artifacts: Vec<(ArtifactKind, PathBuf)>,
}

impl RunArtifactSet {
    pub fn new(
        output_dir: &Path,
        identity: &RunIdentity,
        expected_topics: Option<u64>,
        diagnostics: bool,
    ) -> Self {
        let mut kinds = ArtifactKind::REQUIRED.to_vec();
        if diagnostics {
            kinds.push(ArtifactKind::Diagnostics);
        }
        let artifacts = kinds
            .into_iter()
            .map(|kind| (kind, output_dir.join(kind.file_name(identity))))
            .collect();

        Self {
            identity: identity.clone(),
            expected_topics,
            artifacts,
        }
    }

    /// All artifacts with their kinds, in engine-flag order.
    pub fn artifacts(&self) -> &[(ArtifactKind, PathBuf)] {
        &self.artifacts
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.artifacts.iter().map(|(_, p)| p.as_path())
    }

    pub fn path(&self, kind: ArtifactKind) -> Option<&Path> {
        self.artifacts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_path())
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Delete every artifact that exists. Missing files are not an error.
    pub fn remove_all(&self) -> io::Result<()> {
        for path in self.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
