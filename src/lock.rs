//! Single-writer lock for a version-store root.
//!
//! The lock is a `.lock` file created with `create_new`, so at most one
//! process (or thread) can hold it. It records the holder's pid and
//! purpose and is removed when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CorpusError;

pub const LOCK_FILE: &str = ".lock";

#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Take the lock or fail immediately with
    /// [`CorpusError::ConcurrentModification`].
    pub fn acquire(root: &Path, purpose: &str) -> Result<Self, CorpusError> {
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                return Err(CorpusError::ConcurrentModification {
                    lock_path: path,
                    holder,
                });
            }
            Err(e) => return Err(CorpusError::Io { path, source: e }),
        };
        let lock = Self { path };
        writeln!(file, "pid {} {}", std::process::id(), purpose)
            .map_err(CorpusError::io(&lock.path))?;
        debug!(purpose, "acquired corpus writer lock");
        Ok(lock)
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let held = WriterLock::acquire(dir.path(), "build corpus-2025-01-15").unwrap();
        match WriterLock::acquire(dir.path(), "activate corpus-2025-01-15") {
            Err(CorpusError::ConcurrentModification { holder, .. }) => {
                assert!(holder.contains("build corpus-2025-01-15"));
            }
            other => panic!("expected ConcurrentModification, got {:?}", other),
        }
        drop(held);
        assert!(WriterLock::acquire(dir.path(), "retry").is_ok());
    }

    #[test]
    fn test_drop_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = WriterLock::acquire(dir.path(), "prune").unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }
}
