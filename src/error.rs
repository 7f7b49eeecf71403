//! Version-store errors.
//!
//! Every variant names the version and, where one is involved, the
//! specific artifact or path that failed. Any of these aborts the whole
//! build or activation: a corpus is either fully trustworthy or it is not
//! made current.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A manifest entry whose on-disk content does not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMismatch {
    /// Path relative to the version directory, e.g. `chunks.jsonl`.
    pub artifact: String,
    pub expected: String,
    /// `None` when the file is missing.
    pub actual: Option<String>,
}

impl std::fmt::Display for ArtifactMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{} (expected sha256 {}, found {})",
                self.artifact,
                short(&self.expected),
                short(actual)
            ),
            None => write!(f, "{} (missing)", self.artifact),
        }
    }
}

fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

fn describe(mismatches: &[ArtifactMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error(
        "version {version_id} already exists with different content (differs in: {})",
        .artifacts.join(", ")
    )]
    VersionConflict {
        version_id: String,
        artifacts: Vec<String>,
    },

    #[error("version {version_id} failed its integrity check: {}", describe(.mismatches))]
    Integrity {
        version_id: String,
        mismatches: Vec<ArtifactMismatch>,
    },

    #[error("corpus is locked by another writer ({holder}); remove {} if it is stale", .lock_path.display())]
    ConcurrentModification { lock_path: PathBuf, holder: String },

    #[error("unknown corpus version {0}")]
    UnknownVersion(String),

    #[error("invalid version id '{0}': expected corpus-YYYY-MM-DD")]
    InvalidVersionId(String),

    #[error("invalid consolidation date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("version {0} has never been current and cannot be a rollback target")]
    NotPreviouslyActive(String),

    #[error("no previously current version is available to roll back to")]
    NoRollbackTarget,

    #[error("reload hook failed for {version_id}; current version left unchanged: {message}")]
    ReloadFailed { version_id: String, message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CorpusError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> CorpusError + '_ {
        move |source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
