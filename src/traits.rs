//! Extension points for the ingestion pipeline and the version store.
//!
//! Two seams are pluggable:
//!
//! - [`ChunkIndexer`] receives the chunk stream of a new version and
//!   writes index artifacts (embeddings, lookup tables) into a directory.
//!   Everything it writes is snapshotted and checksummed with the version.
//! - [`ReloadHook`] tells downstream consumers that the current version
//!   changed. It runs while the store's writer lock is held; if it fails,
//!   the previous version stays current.
//!
//! ```text
//! chunks ──▶ ChunkIndexer ──▶ index/ ──▶ ManifestBuilder ──▶ corpus-YYYY-MM-DD/
//!                                                                   │
//!                                       VersionStore::activate ─────┤
//!                                                                   ▼
//!                                                              ReloadHook
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use statute_corpus_core::model::Chunk;
use tracing::{debug, info};
use walkdir::WalkDir;

// ═══════════════════════════════════════════════════════════════════════
// Indexer Trait
// ═══════════════════════════════════════════════════════════════════════

/// Builds index artifacts for a corpus version.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use statute_corpus::traits::ChunkIndexer;
/// use statute_corpus_core::model::Chunk;
/// use std::path::Path;
///
/// pub struct CountingIndexer;
///
/// #[async_trait]
/// impl ChunkIndexer for CountingIndexer {
///     fn name(&self) -> &str { "counting" }
///
///     async fn index(&self, chunks: &[Chunk], out_dir: &Path) -> Result<()> {
///         std::fs::write(out_dir.join("count.txt"), chunks.len().to_string())?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ChunkIndexer: Send + Sync {
    fn name(&self) -> &str;

    /// Embedding model recorded in the manifest, if this indexer embeds.
    fn model(&self) -> Option<&str> {
        None
    }

    /// Write index artifacts for `chunks` into `out_dir`, which exists and
    /// is empty.
    async fn index(&self, chunks: &[Chunk], out_dir: &Path) -> Result<()>;
}

/// Produces no index artifacts.
pub struct NoIndexer;

#[async_trait]
impl ChunkIndexer for NoIndexer {
    fn name(&self) -> &str {
        "none"
    }

    async fn index(&self, _chunks: &[Chunk], _out_dir: &Path) -> Result<()> {
        Ok(())
    }
}

pub const REFERENCE_TABLE: &str = "references.json";

/// Writes `references.json`: source → reference → chunk id, so a citation
/// such as `ITA s.118(1)` can be resolved without scanning the stream.
pub struct ReferenceIndexer;

#[async_trait]
impl ChunkIndexer for ReferenceIndexer {
    fn name(&self) -> &str {
        "references"
    }

    async fn index(&self, chunks: &[Chunk], out_dir: &Path) -> Result<()> {
        let mut table: BTreeMap<&str, BTreeMap<&str, String>> = BTreeMap::new();
        for chunk in chunks {
            table
                .entry(chunk.source.as_str())
                .or_default()
                .insert(chunk.reference.as_str(), chunk.chunk_id());
        }
        let path = out_dir.join(REFERENCE_TABLE);
        let json = serde_json::to_vec_pretty(&table)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(entries = chunks.len(), "wrote reference table");
        Ok(())
    }
}

/// Copies artifacts an external embedding job already produced.
pub struct ArtifactDirIndexer {
    dir: PathBuf,
    model: Option<String>,
}

impl ArtifactDirIndexer {
    pub fn new(dir: impl Into<PathBuf>, model: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            model,
        }
    }
}

#[async_trait]
impl ChunkIndexer for ArtifactDirIndexer {
    fn name(&self) -> &str {
        "artifact-dir"
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    async fn index(&self, _chunks: &[Chunk], out_dir: &Path) -> Result<()> {
        if !self.dir.is_dir() {
            bail!("Index directory does not exist: {}", self.dir.display());
        }
        let mut copied = 0usize;
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.dir)?;
            let dest = out_dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
        info!(files = copied, from = %self.dir.display(), "copied index artifacts");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reload Hook
// ═══════════════════════════════════════════════════════════════════════

/// Notifies consumers that `version_id` is now current.
pub trait ReloadHook: Send + Sync {
    fn reload(&self, version_id: &str, version_dir: &Path) -> Result<()>;
}

/// Nothing to notify.
pub struct NoReload;

impl ReloadHook for NoReload {
    fn reload(&self, version_id: &str, _version_dir: &Path) -> Result<()> {
        debug!(version = %version_id, "no reload hook configured");
        Ok(())
    }
}

/// Runs an external command. The version id and directory are passed in
/// `CORPUS_VERSION` and `CORPUS_DIR`; a non-zero exit fails the reload.
pub struct CommandReloadHook {
    program: String,
    args: Vec<String>,
}

impl CommandReloadHook {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("reload.command must not be empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl ReloadHook for CommandReloadHook {
    fn reload(&self, version_id: &str, version_dir: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("CORPUS_VERSION", version_id)
            .env("CORPUS_DIR", version_dir)
            .output()
            .with_context(|| format!("Failed to run reload command '{}'", self.program))?;
        if !output.status.success() {
            bail!(
                "reload command '{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(version = %version_id, command = %self.program, "reload command succeeded");
        Ok(())
    }
}
