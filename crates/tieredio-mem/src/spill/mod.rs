//! Spill files and memory-mapped views over them.
//!
//! A [`SpillFile`] is the write side of a buffer that moved to disk. Until
//! [`SpillFile::finish`] succeeds it owns the file on disk: dropping it (error,
//! cancellation, panic) removes the partial file.

pub mod mapped;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tieredio_core::error::{Error, Result};
use tieredio_io::fs;

pub use mapped::{MappedFile, MappedReader};

/// File name prefix for every spill file.
pub const SPILL_PREFIX: &str = "tieredio-spill-";

const WRITE_BUFFER: usize = 64 * 1024;

pub struct SpillFile {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    written: u64,
    preallocated: u64,
}

impl SpillFile {
    /// Create a new spill file in `dir`, optionally reserving `preallocate`
    /// bytes. Reservation failures are logged and ignored.
    pub fn create(dir: &Path, preallocate: u64) -> Result<Self> {
        let (file, path) = fs::create_temp_file(dir, SPILL_PREFIX)
            .map_err(|e| Error::SpillFailed(format!("create in {}: {e}", dir.display())))?;

        let mut preallocated = 0;
        if preallocate > 0 {
            match file.set_len(preallocate) {
                Ok(()) => preallocated = preallocate,
                Err(e) => {
                    tracing::debug!(path = %path.display(), bytes = preallocate, error = %e, "preallocation unsupported, skipping");
                }
            }
        }

        tracing::debug!(path = %path.display(), preallocated, "created spill file");
        Ok(Self {
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER, file)),
            path,
            written: 0,
            preallocated,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::SpillFailed("spill file already finished".into()))?;
        writer
            .write_all(data)
            .map_err(|e| Error::SpillFailed(format!("write {}: {e}", self.path.display())))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush, trim any preallocated tail, and hand the file over to the caller.
    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::SpillFailed("spill file already finished".into()))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::SpillFailed(format!("flush {}: {}", self.path.display(), e.error())))?;
        if self.preallocated > self.written {
            file.set_len(self.written)
                .map_err(|e| Error::SpillFailed(format!("truncate {}: {e}", self.path.display())))?;
        }
        drop(file);

        // Ownership of the path moves to the caller; Drop must not remove it.
        let path = std::mem::take(&mut self.path);
        Ok((path, self.written))
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        self.writer.take();
        if let Err(e) = fs::remove_path(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove partial spill file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_truncates_preallocation() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = SpillFile::create(dir.path(), 1 << 20).unwrap();
        f.write(b"hello").unwrap();
        let (path, len) = f.finish().unwrap();
        assert_eq!(len, 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn dropping_unfinished_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = SpillFile::create(dir.path(), 0).unwrap();
        f.write(&[1u8; 1000]).unwrap();
        let path = f.path().to_path_buf();
        assert!(path.exists());
        drop(f);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_spill_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpillFile::create(&dir.path().join("gone"), 0).err().unwrap();
        assert!(matches!(err, Error::SpillFailed(_)));
    }
}
