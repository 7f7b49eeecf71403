//! The version store: which corpus version is current, and switching it.
//!
//! The current version lives in a `CURRENT` pointer file under the store
//! root, replaced atomically (write to a temp file, then rename). Every
//! switch re-verifies the target's checksums, runs the reload hook, and is
//! appended to `activations.jsonl`. Writers serialize on the store's
//! `.lock` file; a second writer fails fast with
//! [`CorpusError::ConcurrentModification`].
//!
//! ```text
//! <root>/
//! ├── CURRENT                 "corpus-2025-01-15"
//! ├── activations.jsonl       audit log
//! ├── .lock                   present while a writer is active
//! ├── .staging/               builds and prunes in progress
//! ├── corpus-2024-12-01/
//! └── corpus-2025-01-15/
//! ```

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ArtifactMismatch, CorpusError};
use crate::lock::WriterLock;
use crate::manifest::{
    validate_version_id, verify_artifacts, CorpusManifest, MANIFEST_FILE, STAGING_DIR,
};
use crate::traits::ReloadHook;

pub const CURRENT_FILE: &str = "CURRENT";
pub const AUDIT_LOG: &str = "activations.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Activate,
    Rollback,
}

impl std::fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationKind::Activate => f.write_str("activate"),
            ActivationKind::Rollback => f.write_str("rollback"),
        }
    }
}

/// One line of the activation audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationEvent {
    pub at: DateTime<Utc>,
    pub event: ActivationKind,
    pub version_id: String,
    pub previous: Option<String>,
}

/// Summary of one stored version, as shown by `corpus list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub source_count: usize,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub version_id: String,
    /// Number of files checked.
    pub checked: usize,
    pub mismatches: Vec<ArtifactMismatch>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub struct VersionStore {
    root: PathBuf,
    current: RwLock<Option<String>>,
}

impl VersionStore {
    /// Open (creating if needed) the store at `root` and load the
    /// persisted current-version pointer.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(CorpusError::io(&root))?;
        let current = read_pointer(&root)?;
        Ok(Self {
            root,
            current: RwLock::new(current),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The version readers should use, if any has been activated.
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn version_dir(&self, version_id: &str) -> Result<PathBuf, CorpusError> {
        validate_version_id(version_id)?;
        Ok(self.root.join(version_id))
    }

    /// Load the manifest of a published version.
    pub fn manifest(&self, version_id: &str) -> Result<CorpusManifest, CorpusError> {
        let dir = self.version_dir(version_id)?;
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(CorpusError::UnknownVersion(version_id.to_string()));
        }
        CorpusManifest::load(&dir)
    }

    pub fn current_manifest(&self) -> Result<Option<CorpusManifest>, CorpusError> {
        match self.current() {
            Some(id) => self.manifest(&id).map(Some),
            None => Ok(None),
        }
    }

    /// All published versions, most recently created first.
    pub fn list(&self) -> Result<Vec<VersionEntry>, CorpusError> {
        let current = self.current();
        let mut versions = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(CorpusError::io(&self.root))?;
        for entry in entries {
            let entry = entry.map_err(CorpusError::io(&self.root))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_version_id(&name).is_err() || !entry.path().join(MANIFEST_FILE).is_file()
            {
                continue;
            }
            let manifest = CorpusManifest::load(&entry.path())?;
            versions.push(VersionEntry {
                is_current: current.as_deref() == Some(name.as_str()),
                version_id: name,
                created_at: manifest.created_at,
                chunk_count: manifest.processing.chunk_count,
                source_count: manifest.sources.len(),
            });
        }
        versions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.version_id.cmp(&a.version_id))
        });
        Ok(versions)
    }

    /// Recompute every checksum in the version's manifest.
    pub fn verify(&self, version_id: &str) -> Result<VerifyReport, CorpusError> {
        let manifest = self.manifest(version_id)?;
        let dir = self.version_dir(version_id)?;
        let mismatches = verify_artifacts(&dir, &manifest)?;
        Ok(VerifyReport {
            version_id: version_id.to_string(),
            checked: manifest.expected_files().len(),
            mismatches,
        })
    }

    /// Make `version_id` current after verifying it and reloading
    /// downstream consumers.
    pub fn activate(
        &self,
        version_id: &str,
        hook: &dyn ReloadHook,
    ) -> Result<VerifyReport, CorpusError> {
        self.switch(version_id, ActivationKind::Activate, hook)
    }

    /// Return to a previously current version. With no target, the most
    /// recent previously current version other than the current one is
    /// chosen. Returns the version that became current.
    pub fn rollback(
        &self,
        target: Option<&str>,
        hook: &dyn ReloadHook,
    ) -> Result<String, CorpusError> {
        let history = self.history()?;
        let current = read_pointer(&self.root)?;
        let target = match target {
            Some(target) => {
                validate_version_id(target)?;
                if !history.iter().any(|event| event.version_id == target) {
                    return Err(CorpusError::NotPreviouslyActive(target.to_string()));
                }
                target.to_string()
            }
            None => history
                .iter()
                .rev()
                .map(|event| event.version_id.as_str())
                .find(|id| {
                    Some(*id) != current.as_deref() && self.root.join(id).join(MANIFEST_FILE).is_file()
                })
                .map(str::to_string)
                .ok_or(CorpusError::NoRollbackTarget)?,
        };
        self.switch(&target, ActivationKind::Rollback, hook)?;
        Ok(target)
    }

    /// Activation history, oldest first.
    pub fn history(&self) -> Result<Vec<ActivationEvent>, CorpusError> {
        let path = self.root.join(AUDIT_LOG);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorpusError::Io { path, source: e }),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| CorpusError::Manifest {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Delete all but the `keep` most recently created versions. The current
    /// version is never deleted. If nothing would be left, the most recent
    /// version that still verifies is kept. Returns the deleted version ids.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, CorpusError> {
        let _lock = WriterLock::acquire(&self.root, "prune")?;
        let current = read_pointer(&self.root)?;
        let versions = self.list()?;

        let mut retained: HashSet<&str> = versions
            .iter()
            .take(keep)
            .map(|v| v.version_id.as_str())
            .collect();
        if let Some(current) = current.as_deref() {
            retained.insert(current);
        }
        if retained.is_empty() {
            let keeper = versions
                .iter()
                .find(|v| {
                    self.verify(&v.version_id)
                        .map(|report| report.passed())
                        .unwrap_or(false)
                })
                .or_else(|| versions.first());
            if let Some(keeper) = keeper {
                retained.insert(keeper.version_id.as_str());
            }
        }

        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(CorpusError::io(&staging))?;
        let mut removed = Vec::new();
        for version in versions.iter().filter(|v| !retained.contains(v.version_id.as_str())) {
            let dir = self.root.join(&version.version_id);
            // Move out of the visible namespace first, so readers never
            // see a half-deleted version.
            let doomed = staging.join(format!("{}.pruned.{}", version.version_id, std::process::id()));
            fs::rename(&dir, &doomed).map_err(CorpusError::io(&dir))?;
            fs::remove_dir_all(&doomed).map_err(CorpusError::io(&doomed))?;
            info!(version = %version.version_id, "pruned corpus version");
            removed.push(version.version_id.clone());
        }
        Ok(removed)
    }

    fn switch(
        &self,
        version_id: &str,
        kind: ActivationKind,
        hook: &dyn ReloadHook,
    ) -> Result<VerifyReport, CorpusError> {
        let _lock = WriterLock::acquire(&self.root, &format!("{} {}", kind, version_id))?;

        let report = self.verify(version_id)?;
        if !report.passed() {
            return Err(CorpusError::Integrity {
                version_id: version_id.to_string(),
                mismatches: report.mismatches,
            });
        }

        let previous = read_pointer(&self.root)?;
        write_pointer(&self.root, Some(version_id))?;
        let version_dir = self.version_dir(version_id)?;
        if let Err(e) = hook.reload(version_id, &version_dir) {
            write_pointer(&self.root, previous.as_deref())?;
            *self.current.write().unwrap_or_else(|p| p.into_inner()) = previous;
            warn!(version = %version_id, error = %e, "reload failed; pointer restored");
            return Err(CorpusError::ReloadFailed {
                version_id: version_id.to_string(),
                message: format!("{:#}", e),
            });
        }
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(version_id.to_string());

        let event = ActivationEvent {
            at: Utc::now(),
            event: kind,
            version_id: version_id.to_string(),
            previous: previous.clone(),
        };
        self.append_history(&event)?;
        match kind {
            ActivationKind::Activate => info!(
                version = %version_id,
                previous = previous.as_deref().unwrap_or("none"),
                "activated corpus version"
            ),
            ActivationKind::Rollback => warn!(
                version = %version_id,
                previous = previous.as_deref().unwrap_or("none"),
                "rolled back corpus version"
            ),
        }
        Ok(report)
    }

    fn append_history(&self, event: &ActivationEvent) -> Result<(), CorpusError> {
        let path = self.root.join(AUDIT_LOG);
        let line = serde_json::to_string(event).map_err(|source| CorpusError::Manifest {
            path: path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(CorpusError::io(&path))?;
        writeln!(file, "{}", line).map_err(CorpusError::io(&path))
    }
}

fn read_pointer(root: &Path) -> Result<Option<String>, CorpusError> {
    let path = root.join(CURRENT_FILE);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let id = content.trim();
            if id.is_empty() {
                Ok(None)
            } else {
                validate_version_id(id)?;
                Ok(Some(id.to_string()))
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CorpusError::Io { path, source: e }),
    }
}

/// Replace the pointer atomically; `None` clears it.
fn write_pointer(root: &Path, version_id: Option<&str>) -> Result<(), CorpusError> {
    let path = root.join(CURRENT_FILE);
    let Some(version_id) = version_id else {
        return match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(CorpusError::Io { path, source: e }),
            _ => Ok(()),
        };
    };
    let tmp = root.join(format!("{}.tmp", CURRENT_FILE));
    {
        let mut file = fs::File::create(&tmp).map_err(CorpusError::io(&tmp))?;
        writeln!(file, "{}", version_id).map_err(CorpusError::io(&tmp))?;
        file.sync_all().map_err(CorpusError::io(&tmp))?;
    }
    fs::rename(&tmp, &path).map_err(CorpusError::io(&path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildRequest, ManifestBuilder, Processing, SourceInput};
    use crate::traits::NoReload;
    use statute_corpus_core::chunk::ChunkingConfig;

    struct FailingReload;

    impl ReloadHook for FailingReload {
        fn reload(&self, _version_id: &str, _version_dir: &Path) -> anyhow::Result<()> {
            anyhow::bail!("index server unreachable")
        }
    }

    fn publish(root: &Path, date: &str, text: &str) {
        let input = tempfile::tempdir().unwrap();
        let source = input.path().join("I-3.3.xml");
        fs::write(&source, text).unwrap();
        ManifestBuilder::new(root)
            .build(&BuildRequest {
                consolidation_date: date.to_string(),
                sources: vec![SourceInput {
                    name: "ITA".to_string(),
                    path: source,
                    consolidation_date: None,
                }],
                chunk_stream: text.as_bytes().to_vec(),
                index_dir: None,
                processing: Processing {
                    chunk_count: 1,
                    over_budget_count: 0,
                    documents: vec!["ITA".to_string()],
                    chunking_config: ChunkingConfig::default(),
                    embedding_model: None,
                },
            })
            .unwrap();
        // Keep creation timestamps strictly ordered between builds.
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    #[test]
    fn test_activate_persists_pointer() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2025-01-15", "a");
        let store = VersionStore::open(root.path()).unwrap();
        assert_eq!(store.current(), None);

        store.activate("corpus-2025-01-15", &NoReload).unwrap();
        assert_eq!(store.current().as_deref(), Some("corpus-2025-01-15"));

        let reopened = VersionStore::open(root.path()).unwrap();
        assert_eq!(reopened.current().as_deref(), Some("corpus-2025-01-15"));
        assert!(!root.path().join(".lock").exists());
    }

    #[test]
    fn test_tampered_version_is_not_activated() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-12-01", "old");
        publish(root.path(), "2025-01-15", "new");
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2024-12-01", &NoReload).unwrap();

        fs::write(root.path().join("corpus-2025-01-15/chunks.jsonl"), "edited").unwrap();
        match store.activate("corpus-2025-01-15", &NoReload) {
            Err(CorpusError::Integrity { mismatches, .. }) => {
                assert_eq!(mismatches[0].artifact, "chunks.jsonl");
            }
            other => panic!("expected Integrity, got {:?}", other),
        }
        assert_eq!(store.current().as_deref(), Some("corpus-2024-12-01"));
    }

    #[test]
    fn test_unknown_and_malformed_versions() {
        let root = tempfile::tempdir().unwrap();
        let store = VersionStore::open(root.path()).unwrap();
        assert!(matches!(
            store.activate("corpus-2030-01-01", &NoReload),
            Err(CorpusError::UnknownVersion(_))
        ));
        assert!(matches!(
            store.verify("../etc"),
            Err(CorpusError::InvalidVersionId(_))
        ));
    }

    #[test]
    fn test_rollback_returns_to_previous() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-12-01", "old");
        publish(root.path(), "2025-01-15", "new");
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2024-12-01", &NoReload).unwrap();
        store.activate("corpus-2025-01-15", &NoReload).unwrap();

        let target = store.rollback(None, &NoReload).unwrap();
        assert_eq!(target, "corpus-2024-12-01");
        assert_eq!(store.current().as_deref(), Some("corpus-2024-12-01"));

        let history = store.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].event, ActivationKind::Rollback);
        assert_eq!(history[2].previous.as_deref(), Some("corpus-2025-01-15"));
    }

    #[test]
    fn test_rollback_rejects_never_active_target() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-12-01", "old");
        publish(root.path(), "2025-01-15", "new");
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2025-01-15", &NoReload).unwrap();

        assert!(matches!(
            store.rollback(Some("corpus-2024-12-01"), &NoReload),
            Err(CorpusError::NotPreviouslyActive(_))
        ));
        assert!(matches!(
            store.rollback(None, &NoReload),
            Err(CorpusError::NoRollbackTarget)
        ));
    }

    #[test]
    fn test_failed_reload_restores_pointer() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-12-01", "old");
        publish(root.path(), "2025-01-15", "new");
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2024-12-01", &NoReload).unwrap();

        let err = store
            .activate("corpus-2025-01-15", &FailingReload)
            .unwrap_err();
        assert!(err.to_string().contains("index server unreachable"));
        assert_eq!(store.current().as_deref(), Some("corpus-2024-12-01"));
        let persisted = fs::read_to_string(root.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(persisted.trim(), "corpus-2024-12-01");
        assert_eq!(store.history().unwrap().len(), 1);
    }

    #[test]
    fn test_activation_under_foreign_lock_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2025-01-15", "a");
        let store = VersionStore::open(root.path()).unwrap();
        let _held = WriterLock::acquire(root.path(), "build corpus-2025-02-01").unwrap();
        assert!(matches!(
            store.activate("corpus-2025-01-15", &NoReload),
            Err(CorpusError::ConcurrentModification { .. })
        ));
        assert_eq!(store.current(), None);
    }

    #[test]
    fn test_list_is_most_recent_first_and_marks_current() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-06-01", "a");
        publish(root.path(), "2025-01-15", "b");
        publish(root.path(), "2024-12-01", "c");
        fs::create_dir_all(root.path().join("not-a-version")).unwrap();
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2024-12-01", &NoReload).unwrap();

        let ids: Vec<(String, bool)> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|v| (v.version_id, v.is_current))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("corpus-2024-12-01".to_string(), true),
                ("corpus-2025-01-15".to_string(), false),
                ("corpus-2024-06-01".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_list_and_prune_follow_creation_order() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2025-01-15", "newer consolidation");
        publish(root.path(), "2024-06-01", "older consolidation, built later");
        let store = VersionStore::open(root.path()).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[0].version_id, "corpus-2024-06-01");
        assert!(listed[0].created_at >= listed[1].created_at);

        let removed = store.prune(1).unwrap();
        assert_eq!(removed, vec!["corpus-2025-01-15".to_string()]);
        assert!(root.path().join("corpus-2024-06-01").exists());
    }

    #[test]
    fn test_prune_keeps_newest_and_current() {
        let root = tempfile::tempdir().unwrap();
        for (date, text) in [
            ("2024-01-01", "a"),
            ("2024-06-01", "b"),
            ("2024-12-01", "c"),
            ("2025-01-15", "d"),
        ] {
            publish(root.path(), date, text);
        }
        let store = VersionStore::open(root.path()).unwrap();
        store.activate("corpus-2024-01-01", &NoReload).unwrap();

        let removed = store.prune(2).unwrap();
        assert_eq!(removed, vec!["corpus-2024-06-01".to_string()]);
        let left: Vec<String> = store.list().unwrap().into_iter().map(|v| v.version_id).collect();
        assert_eq!(
            left,
            vec!["corpus-2025-01-15", "corpus-2024-12-01", "corpus-2024-01-01"]
        );
    }

    #[test]
    fn test_prune_to_zero_keeps_newest_verified() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "2024-12-01", "old");
        publish(root.path(), "2025-01-15", "new");
        fs::write(root.path().join("corpus-2025-01-15/chunks.jsonl"), "edited").unwrap();
        let store = VersionStore::open(root.path()).unwrap();

        let removed = store.prune(0).unwrap();
        assert_eq!(removed, vec!["corpus-2025-01-15".to_string()]);
        assert!(root.path().join("corpus-2024-12-01").exists());
    }
}
