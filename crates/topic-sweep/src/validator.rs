//! Post-run artifact checks.
//!
//! A run is only trusted when its whole artifact set is present and
//! plausible. The verdict is recomputed from disk every time, so a run that
//! was killed half-way is seen as [`ValidationVerdict::Incomplete`] on the
//! next pass no matter what the previous process reported.

use crate::identity::{ArtifactKind, RunArtifactSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of validating a [`RunArtifactSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    /// Every artifact exists and is non-empty.
    Complete,
    /// At least one artifact is absent or zero bytes long.
    Incomplete { missing: Vec<PathBuf> },
    /// All artifacts exist but their content contradicts the run parameters.
    Corrupt { reason: String },
}

impl ValidationVerdict {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Checks run artifacts on disk.
pub struct ArtifactValidator;

impl ArtifactValidator {
    pub fn validate(set: &RunArtifactSet) -> ValidationVerdict {
        let missing: Vec<PathBuf> = set
            .paths()
            .filter(|p| !is_non_empty_file(p))
            .map(Path::to_path_buf)
            .collect();
        if !missing.is_empty() {
            return ValidationVerdict::Incomplete { missing };
        }

        if let (Some(expected), Some(keys)) =
            (set.expected_topics, set.path(ArtifactKind::TopicKeys))
        {
            if let Err(reason) = check_topic_keys(keys, expected) {
                return ValidationVerdict::Corrupt { reason };
            }
        }

        ValidationVerdict::Complete
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// The topic-keys file has one line per topic: `index<TAB>alpha<TAB>words`.
fn check_topic_keys(path: &Path, expected: u64) -> Result<(), String> {
    let content = std::fs::read(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let content = String::from_utf8_lossy(&content);

    let mut count: u64 = 0;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        count += 1;
        let index = line
            .split('\t')
            .next()
            .and_then(|field| field.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                format!(
                    "{} line {}: no topic index",
                    path.display(),
                    line_no + 1
                )
            })?;
        if index >= expected {
            return Err(format!(
                "{} line {}: topic index {index} out of range for {expected} topics",
                path.display(),
                line_no + 1
            ));
        }
    }

    if count != expected {
        return Err(format!(
            "{} lists {count} topics, expected {expected}",
            path.display()
        ));
    }
    Ok(())
}
