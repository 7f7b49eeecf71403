//! Corpus manifests and the two-phase version builder.
//!
//! A corpus version is a directory `corpus-YYYY-MM-DD/` holding the
//! manifest, a copy of every source file, the chunk stream, and whatever
//! the indexer produced:
//!
//! ```text
//! corpus-2025-01-15/
//! ├── corpus_manifest.json
//! ├── chunks.jsonl
//! ├── sources/I-3.3.xml
//! └── index/...
//! ```
//!
//! [`ManifestBuilder::build`] assembles everything in `.staging/`,
//! checksums it, verifies the checksums, and only then renames the
//! directory into place. A version directory is therefore either absent
//! or complete; readers never see a partial one.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use statute_corpus_core::chunk::ChunkingConfig;
use statute_corpus_core::stream::CHUNK_STREAM_FILE;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::checksum::sha256_file;
use crate::error::{ArtifactMismatch, CorpusError};
use crate::lock::WriterLock;

pub const MANIFEST_FILE: &str = "corpus_manifest.json";
pub const SOURCES_DIR: &str = "sources";
pub const INDEX_DIR: &str = "index";
pub const STAGING_DIR: &str = ".staging";
pub const SCHEMA_VERSION: u32 = 1;

const VERSION_PREFIX: &str = "corpus-";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an ISO `YYYY-MM-DD` consolidation date.
pub fn parse_date(date: &str) -> Result<NaiveDate, CorpusError> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|_| CorpusError::InvalidDate(date.to_string()))
}

/// Version identifier for a consolidation date: `corpus-YYYY-MM-DD`.
pub fn version_id_for(date: &str) -> Result<String, CorpusError> {
    let date = parse_date(date)?;
    Ok(format!("{}{}", VERSION_PREFIX, date.format(DATE_FORMAT)))
}

/// Check that `id` is a well-formed version identifier.
///
/// Version ids double as directory names, so anything else (including
/// path separators) is rejected before it reaches the filesystem.
pub fn validate_version_id(id: &str) -> Result<NaiveDate, CorpusError> {
    let date = id
        .strip_prefix(VERSION_PREFIX)
        .ok_or_else(|| CorpusError::InvalidVersionId(id.to_string()))?;
    let parsed = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| CorpusError::InvalidVersionId(id.to_string()))?;
    if parsed.format(DATE_FORMAT).to_string() != date {
        return Err(CorpusError::InvalidVersionId(id.to_string()));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// File name under `sources/`.
    pub file: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processing {
    pub chunk_count: usize,
    #[serde(default)]
    pub over_budget_count: usize,
    /// Source names in ingestion order.
    #[serde(default)]
    pub documents: Vec<String>,
    pub chunking_config: ChunkingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

/// The authoritative record of a corpus version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub consolidation_date: Option<String>,
    pub sources: BTreeMap<String, SourceEntry>,
    pub processing: Processing,
    /// Derived artifacts, keyed by path relative to the version directory.
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl CorpusManifest {
    /// Read `corpus_manifest.json` from a version directory.
    pub fn load(version_dir: &Path) -> Result<Self, CorpusError> {
        let path = version_dir.join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(CorpusError::io(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| CorpusError::Manifest { path, source })
    }

    fn write(&self, version_dir: &Path) -> Result<(), CorpusError> {
        let path = version_dir.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| CorpusError::Manifest {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(CorpusError::io(&path))
    }

    /// Every checksummed file as `(relative path, sha256)`: sources first,
    /// then derived artifacts.
    pub fn expected_files(&self) -> Vec<(String, &str)> {
        let mut files: Vec<(String, &str)> = self
            .sources
            .values()
            .map(|entry| (format!("{}/{}", SOURCES_DIR, entry.file), entry.sha256.as_str()))
            .collect();
        files.extend(
            self.checksums
                .iter()
                .map(|(artifact, sha)| (artifact.clone(), sha.as_str())),
        );
        files
    }

    /// Artifacts whose content differs between two manifests. Processing
    /// metadata counts as one artifact named `processing`.
    pub fn differing_artifacts(&self, other: &CorpusManifest) -> Vec<String> {
        let mine: BTreeMap<String, &str> = self.expected_files().into_iter().collect();
        let theirs: BTreeMap<String, &str> = other.expected_files().into_iter().collect();
        let names: BTreeSet<&String> = mine.keys().chain(theirs.keys()).collect();
        let mut differing: Vec<String> = names
            .into_iter()
            .filter(|name| mine.get(*name) != theirs.get(*name))
            .cloned()
            .collect();
        if self.processing != other.processing {
            differing.push("processing".to_string());
        }
        differing
    }
}

/// Recompute every checksum listed in `manifest` against `version_dir`.
///
/// Missing and altered files both count as mismatches; other I/O failures
/// are returned as errors.
pub fn verify_artifacts(
    version_dir: &Path,
    manifest: &CorpusManifest,
) -> Result<Vec<ArtifactMismatch>, CorpusError> {
    let mut mismatches = Vec::new();
    for (artifact, expected) in manifest.expected_files() {
        let path = version_dir.join(&artifact);
        let actual = match sha256_file(&path) {
            Ok(actual) if actual == expected => continue,
            Ok(actual) => Some(actual),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(CorpusError::Io { path, source: e }),
        };
        mismatches.push(ArtifactMismatch {
            artifact,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(mismatches)
}

/// A source file to snapshot into the version.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub path: PathBuf,
    pub consolidation_date: Option<String>,
}

/// Everything needed to publish one corpus version.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub consolidation_date: String,
    pub sources: Vec<SourceInput>,
    /// Encoded chunk stream (`chunks.jsonl` content).
    pub chunk_stream: Vec<u8>,
    /// Directory of index artifacts to copy under `index/`.
    pub index_dir: Option<PathBuf>,
    pub processing: Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new version directory was published.
    Created(CorpusManifest),
    /// The version already existed with identical content.
    Unchanged(CorpusManifest),
}

impl BuildOutcome {
    pub fn manifest(&self) -> &CorpusManifest {
        match self {
            BuildOutcome::Created(m) | BuildOutcome::Unchanged(m) => m,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, BuildOutcome::Created(_))
    }
}

/// Removes a staging directory unless it was published.
struct StagingDir {
    path: PathBuf,
    published: bool,
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Publishes corpus versions under a store root.
pub struct ManifestBuilder {
    root: PathBuf,
}

impl ManifestBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build and publish the version for `request.consolidation_date`.
    ///
    /// Rebuilding an existing version with identical content is a no-op
    /// returning [`BuildOutcome::Unchanged`]; different content fails with
    /// [`CorpusError::VersionConflict`] and leaves the existing version
    /// untouched. Holds the store's writer lock for the whole build.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, CorpusError> {
        let version_id = version_id_for(&request.consolidation_date)?;
        let staging_root = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root).map_err(CorpusError::io(&staging_root))?;
        let _lock = WriterLock::acquire(&self.root, &format!("build {}", version_id))?;

        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut staging = StagingDir {
            path: staging_root.join(format!("{}.{}.{}", version_id, std::process::id(), stamp)),
            published: false,
        };
        let sources_dir = staging.path.join(SOURCES_DIR);
        fs::create_dir_all(&sources_dir).map_err(CorpusError::io(&sources_dir))?;

        let mut sources = BTreeMap::new();
        for input in &request.sources {
            let entry = copy_source(input, &sources_dir)?;
            sources.insert(input.name.clone(), entry);
        }

        let mut checksums = BTreeMap::new();
        let stream_path = staging.path.join(CHUNK_STREAM_FILE);
        fs::write(&stream_path, &request.chunk_stream).map_err(CorpusError::io(&stream_path))?;
        checksums.insert(
            CHUNK_STREAM_FILE.to_string(),
            sha256_file(&stream_path).map_err(CorpusError::io(&stream_path))?,
        );
        if let Some(index_dir) = &request.index_dir {
            copy_index(index_dir, &staging.path.join(INDEX_DIR), &mut checksums)?;
        }

        let manifest = CorpusManifest {
            schema_version: SCHEMA_VERSION,
            version: version_id.clone(),
            created_at: Utc::now(),
            consolidation_date: Some(parse_date(&request.consolidation_date)?.to_string()),
            sources,
            processing: request.processing.clone(),
            checksums,
        };
        manifest.write(&staging.path)?;

        let mismatches = verify_artifacts(&staging.path, &manifest)?;
        if !mismatches.is_empty() {
            return Err(CorpusError::Integrity {
                version_id,
                mismatches,
            });
        }

        let target = self.root.join(&version_id);
        if target.exists() {
            let existing = CorpusManifest::load(&target)?;
            let artifacts = existing.differing_artifacts(&manifest);
            if artifacts.is_empty() {
                debug!(version = %version_id, "version already published with identical content");
                return Ok(BuildOutcome::Unchanged(existing));
            }
            return Err(CorpusError::VersionConflict {
                version_id,
                artifacts,
            });
        }

        fs::rename(&staging.path, &target).map_err(CorpusError::io(&target))?;
        staging.published = true;
        info!(
            version = %version_id,
            chunks = manifest.processing.chunk_count,
            sources = manifest.sources.len(),
            "published corpus version"
        );
        Ok(BuildOutcome::Created(manifest))
    }
}

fn copy_source(input: &SourceInput, sources_dir: &Path) -> Result<SourceEntry, CorpusError> {
    let file = input
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CorpusError::Io {
            path: input.path.clone(),
            source: io::Error::new(ErrorKind::InvalidInput, "source path has no file name"),
        })?;
    let dest = sources_dir.join(&file);
    if dest.exists() {
        return Err(CorpusError::Io {
            path: input.path.clone(),
            source: io::Error::new(
                ErrorKind::AlreadyExists,
                format!("another source is already stored as {}", file),
            ),
        });
    }
    fs::copy(&input.path, &dest).map_err(CorpusError::io(&input.path))?;
    Ok(SourceEntry {
        sha256: sha256_file(&dest).map_err(CorpusError::io(&dest))?,
        file,
        consolidation_date: input.consolidation_date.clone(),
    })
}

fn copy_index(
    from: &Path,
    to: &Path,
    checksums: &mut BTreeMap<String, String>,
) -> Result<(), CorpusError> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| CorpusError::Io {
            path: from.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| CorpusError::Io {
                path: entry.path().to_path_buf(),
                source: io::Error::new(ErrorKind::InvalidInput, "index file outside index dir"),
            })?;
        let dest = to.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(CorpusError::io(parent))?;
        }
        fs::copy(entry.path(), &dest).map_err(CorpusError::io(entry.path()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        checksums.insert(
            format!("{}/{}", INDEX_DIR, key),
            sha256_file(&dest).map_err(CorpusError::io(&dest))?,
        );
    }
    Ok(())
}
