//! Seams between buffers and whatever owns their temp storage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tieredio_core::error::{Error, Result};
use tieredio_io::fs;

/// Something a session can register and later release.
///
/// `release` must be idempotent and must not fail because an earlier partial
/// operation left the resource half-built.
pub trait Resource: Send + Sync {
    fn release(&self) -> Result<()>;
    fn is_released(&self) -> bool;
    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Hands out the directory spill files are created in.
///
/// Implemented by the session (lazily creating its private directory and
/// refusing once cleaned) and by a plain path for standalone use.
pub trait SpillTarget: Send + Sync {
    fn spill_dir(&self) -> Result<PathBuf>;
}

impl SpillTarget for PathBuf {
    fn spill_dir(&self) -> Result<PathBuf> {
        fs::ensure_directory(self)
            .map_err(|e| Error::SpillFailed(format!("create spill dir {}: {e}", self.display())))?;
        Ok(self.clone())
    }
}

/// A loose temp file owned by a session (e.g. a path materialized for an
/// in-memory buffer).
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    released: AtomicBool,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for TempFile {
    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        fs::remove_path(&self.path)?;
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("temp file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("t");
        std::fs::write(&p, b"x").unwrap();
        let t = TempFile::new(p.clone());
        t.release().unwrap();
        assert!(t.is_released());
        assert!(!p.exists());
        t.release().unwrap();
    }

    #[test]
    fn pathbuf_target_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("spill/here");
        assert_eq!(target.spill_dir().unwrap(), target);
        assert!(target.is_dir());
    }

    #[test]
    fn pathbuf_target_under_a_file_is_spill_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = file.join("spill").spill_dir().unwrap_err();
        assert!(matches!(err, Error::SpillFailed(_)), "unexpected {err:?}");
    }
}
