//! Read-only memory mappings of finished spill files.
//!
//! A mapping lives behind an `Arc`: the buffer holds one reference, every
//! reader or `Bytes` view holds another, and the region is unmapped only when
//! the last of them is dropped. Releasing the buffer therefore never pulls the
//! memory out from under a reader.

#![allow(unsafe_code)]

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use tieredio_core::error::{Error, Result};
use tieredio_io::fs;

#[derive(Debug)]
pub struct MappedFile {
    map: Mmap,
    path: PathBuf,
}

impl MappedFile {
    /// Map `path`, which must hold exactly `expected_len` bytes.
    pub fn open(path: &Path, expected_len: u64) -> Result<Arc<Self>> {
        let file = fs::open_for_read(path)
            .map_err(|e| Error::MappingFailed(format!("open {}: {e}", path.display())))?;
        // SAFETY: spill files are private to their session and never written
        // again once finished, so the mapped bytes cannot change underneath us.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::MappingFailed(format!("mmap {}: {e}", path.display())))?;
        if map.len() as u64 != expected_len {
            return Err(Error::MappingFailed(format!(
                "{} holds {} bytes, expected {expected_len}",
                path.display(),
                map.len()
            )));
        }
        Ok(Arc::new(Self {
            map,
            path: path.to_path_buf(),
        }))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Zero-copy `Bytes` view that keeps the mapping alive.
    pub fn to_bytes(self: &Arc<Self>) -> Bytes {
        Bytes::from_owner(MapOwner(Arc::clone(self)))
    }
}

struct MapOwner(Arc<MappedFile>);

impl AsRef<[u8]> for MapOwner {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Cursor over a mapping.
#[derive(Debug, Clone)]
pub struct MappedReader {
    map: Arc<MappedFile>,
    pos: u64,
}

impl MappedReader {
    pub fn new(map: Arc<MappedFile>) -> Self {
        Self { map, pos: 0 }
    }

    /// The unread tail, without copying.
    pub fn remaining_slice(&self) -> &[u8] {
        let data = self.map.as_slice();
        let start = (self.pos as usize).min(data.len());
        &data[start..]
    }
}

impl Read for MappedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = self.remaining_slice();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MappedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.map.len() as i128;
        let next = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(d) => len + d as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of mapping",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}
