//! The materialized payload of one operation.
//!
//! A buffer starts in memory and moves, one way only, to a spill file once the
//! policy says so; finished spill files may additionally be memory-mapped on
//! first read-back:
//!
//! ```text
//! Growing ──finalize──▶ InMemory
//!    │
//!    └─spill─▶ Spilling ──finalize──▶ SpilledToFile ──first read (mmap)──▶ Mapped
//! ```
//!
//! Accumulation (`append`/`finalize`) and read-back (`reader`/`bytes`) are
//! disjoint phases. `release` ends both and is idempotent.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tieredio_core::config::IoConfig;
use tieredio_core::error::{Error, Result};
use tieredio_core::id::BufferId;
use tieredio_core::policy::{self, Placement};
use tieredio_io::fs;

use crate::guard::{MemoryGauge, Reservation};
use crate::resource::{Resource, SpillTarget};
use crate::spill::{MappedFile, MappedReader, SpillFile};

/// Observable buffer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    InMemory,
    SpilledToFile,
    Mapped,
    Released,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferState::InMemory => "in-memory",
            BufferState::SpilledToFile => "spilled",
            BufferState::Mapped => "mapped",
            BufferState::Released => "released",
        };
        f.write_str(s)
    }
}

enum Store {
    Growing {
        buf: BytesMut,
        reservation: Reservation,
    },
    Spilling(SpillFile),
    Memory {
        data: Bytes,
        _reservation: Reservation,
    },
    File {
        path: PathBuf,
        mapping_failed: bool,
    },
    Mapped {
        path: PathBuf,
        map: Arc<MappedFile>,
    },
    Released,
}

impl Store {
    fn is_accumulating(&self) -> bool {
        matches!(self, Store::Growing { .. } | Store::Spilling(_))
    }
}

struct Inner {
    store: Store,
    len: u64,
    hasher: Option<blake3::Hasher>,
    digest: Option<[u8; 32]>,
}

/// Everything a buffer needs from its owner.
#[derive(Clone)]
pub struct BufferContext {
    pub config: Arc<IoConfig>,
    pub target: Arc<dyn SpillTarget>,
    pub gauge: MemoryGauge,
}

impl BufferContext {
    pub fn new(config: Arc<IoConfig>, target: Arc<dyn SpillTarget>, gauge: MemoryGauge) -> Self {
        Self {
            config,
            target,
            gauge,
        }
    }
}

pub struct Buffer {
    id: BufferId,
    size_hint: Option<u64>,
    ctx: BufferContext,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}

impl Buffer {
    /// Start accumulating according to `placement`.
    pub fn new(placement: Placement, size_hint: Option<u64>, ctx: BufferContext) -> Result<Self> {
        let id = BufferId::next();
        let store = if placement.spill_immediately() {
            let dir = ctx.target.spill_dir()?;
            tracing::debug!(buffer = %id, size_hint, "spilling immediately");
            Store::Spilling(SpillFile::create(&dir, placement.preallocate)?)
        } else {
            // Preallocation is best effort: if the gauge refuses, grow on demand.
            let reservation = ctx
                .gauge
                .try_reserve(placement.preallocate)
                .or_else(|| ctx.gauge.try_reserve(0))
                .ok_or_else(|| Error::BufferState("memory gauge refused an empty reservation".into()))?;
            let capacity = reservation.bytes() as usize;
            Store::Growing {
                buf: BytesMut::with_capacity(capacity),
                reservation,
            }
        };

        Ok(Self {
            id,
            size_hint,
            inner: Mutex::new(Inner {
                store,
                len: 0,
                hasher: ctx.config.checksum.then(blake3::Hasher::new),
                digest: None,
            }),
            ctx,
        })
    }

    /// Wrap bytes that are already in memory as a finished buffer, without
    /// copying. Returns `None` when the memory gauge has no room for them.
    pub fn from_bytes(data: Bytes, ctx: BufferContext) -> Option<Self> {
        let reservation = ctx.gauge.try_reserve(data.len() as u64)?;
        let digest = ctx
            .config
            .checksum
            .then(|| *blake3::hash(&data).as_bytes());
        Some(Self {
            id: BufferId::next(),
            size_hint: Some(data.len() as u64),
            inner: Mutex::new(Inner {
                len: data.len() as u64,
                store: Store::Memory {
                    data,
                    _reservation: reservation,
                },
                hasher: None,
                digest,
            }),
            ctx,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    /// Bytes appended so far (the final length once finalized).
    pub fn len(&self) -> u64 {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> BufferState {
        match &self.inner.lock().store {
            Store::Growing { .. } | Store::Memory { .. } => BufferState::InMemory,
            Store::Spilling(_) | Store::File { .. } => BufferState::SpilledToFile,
            Store::Mapped { .. } => BufferState::Mapped,
            Store::Released => BufferState::Released,
        }
    }

    pub fn is_finalized(&self) -> bool {
        let inner = self.inner.lock();
        !inner.store.is_accumulating() && !matches!(inner.store, Store::Released)
    }

    /// blake3 digest of the content, when checksums are enabled.
    pub fn digest(&self) -> Option<[u8; 32]> {
        self.inner.lock().digest
    }

    /// Backing file, once the buffer lives on disk.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.inner.lock().store {
            Store::Spilling(f) => Some(f.path().to_path_buf()),
            Store::File { path, .. } | Store::Mapped { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    pub fn append(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return self.expect_accumulating();
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let needs_spill = match &mut inner.store {
            Store::Growing { buf, reservation } => {
                let new_len = (buf.len() + data.len()) as u64;
                if policy::should_spill(new_len, &self.ctx.config) {
                    true
                } else if !reservation.try_resize(new_len) {
                    tracing::debug!(buffer = %self.id, bytes = new_len, "memory limit reached");
                    true
                } else {
                    buf.extend_from_slice(data);
                    false
                }
            }
            Store::Spilling(file) => {
                if let Err(e) = file.write(data) {
                    inner.store = Store::Released;
                    return Err(e);
                }
                false
            }
            Store::Released => return Err(Error::BufferState("append after release".into())),
            _ => return Err(Error::BufferState("append after finalize".into())),
        };

        if needs_spill {
            self.spill_locked(inner)?;
            if let Store::Spilling(file) = &mut inner.store {
                if let Err(e) = file.write(data) {
                    inner.store = Store::Released;
                    return Err(e);
                }
            }
        }

        inner.len += data.len() as u64;
        if let Some(h) = inner.hasher.as_mut() {
            h.update(data);
        }
        Ok(())
    }

    /// Move the in-memory bytes collected so far into a new spill file.
    fn spill_locked(&self, inner: &mut Inner) -> Result<()> {
        let Store::Growing { buf, reservation } =
            std::mem::replace(&mut inner.store, Store::Released)
        else {
            return Ok(());
        };

        let preallocate = self
            .size_hint
            .map(|h| h.min(self.ctx.config.max_preallocate))
            .unwrap_or(0);
        let dir = self.ctx.target.spill_dir()?;
        let mut file = SpillFile::create(&dir, preallocate)?;
        file.write(&buf)?;
        tracing::debug!(buffer = %self.id, bytes = buf.len(), path = %file.path().display(), "spilled to file");
        drop(reservation);

        inner.store = Store::Spilling(file);
        Ok(())
    }

    /// End the accumulation phase. Returns the final length.
    pub fn finalize(&self) -> Result<u64> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match std::mem::replace(&mut inner.store, Store::Released) {
            Store::Growing { buf, reservation } => {
                inner.store = Store::Memory {
                    data: buf.freeze(),
                    _reservation: reservation,
                };
            }
            Store::Spilling(file) => {
                let (path, len) = file.finish()?;
                debug_assert_eq!(len, inner.len);
                inner.store = Store::File {
                    path,
                    mapping_failed: false,
                };
            }
            Store::Released => return Err(Error::BufferState("finalize after release".into())),
            other => {
                inner.store = other;
                return Err(Error::BufferState("buffer already finalized".into()));
            }
        }
        if let Some(h) = inner.hasher.take() {
            inner.digest = Some(*h.finalize().as_bytes());
        }
        Ok(inner.len)
    }

    /// Fresh, independent read cursor over the finalized content.
    pub fn reader(&self) -> Result<BufferReader> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        self.maybe_map(inner);
        match &inner.store {
            Store::Memory { data, .. } => Ok(BufferReader::Memory(Cursor::new(data.clone()))),
            Store::Mapped { map, .. } => Ok(BufferReader::Mapped(MappedReader::new(Arc::clone(map)))),
            Store::File { path, .. } => {
                let file = fs::open_for_read(path)?;
                Ok(BufferReader::File(BufReader::new(file)))
            }
            Store::Released => Err(Error::BufferState("read after release".into())),
            _ => Err(Error::BufferState("read before finalize".into())),
        }
    }

    /// The whole content as `Bytes`: a view for in-memory and mapped buffers,
    /// a single read of the file otherwise.
    pub fn bytes(&self) -> Result<Bytes> {
        let path = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            self.maybe_map(inner);
            match &inner.store {
                Store::Memory { data, .. } => return Ok(data.clone()),
                Store::Mapped { map, .. } => return Ok(map.to_bytes()),
                Store::File { path, .. } => path.clone(),
                Store::Released => return Err(Error::BufferState("read after release".into())),
                _ => return Err(Error::BufferState("read before finalize".into())),
            }
        };
        let data = fs::read_limit(&path, 0)?;
        Ok(Bytes::from(data))
    }

    /// Copy the content to `dest` atomically. Returns bytes written.
    pub fn persist_to(&self, dest: &Path) -> Result<u64> {
        let mut reader = self.reader()?;
        fs::safe_write_from(dest, &mut reader)
    }

    /// Lazily switch a finished spill file to a mapping. Failure is logged and
    /// remembered; reads fall back to the file.
    fn maybe_map(&self, inner: &mut Inner) {
        let cfg = &self.ctx.config;
        if !cfg.mmap_enabled || inner.len <= cfg.mmap_min_size {
            return;
        }
        let Store::File {
            path,
            mapping_failed,
        } = &mut inner.store
        else {
            return;
        };
        if *mapping_failed {
            return;
        }
        match MappedFile::open(path, inner.len) {
            Ok(map) => {
                tracing::debug!(buffer = %self.id, bytes = map.len(), "mapped spill file");
                let path = std::mem::take(path);
                inner.store = Store::Mapped { path, map };
            }
            Err(e) => {
                tracing::warn!(buffer = %self.id, error = %e, "falling back to buffered file reads");
                *mapping_failed = true;
            }
        }
    }

    fn expect_accumulating(&self) -> Result<()> {
        let inner = self.inner.lock();
        match &inner.store {
            s if s.is_accumulating() => Ok(()),
            Store::Released => Err(Error::BufferState("append after release".into())),
            _ => Err(Error::BufferState("append after finalize".into())),
        }
    }

    /// Drop in-memory bytes, unmap and remove any backing file. Readers that
    /// already hold the mapping keep it alive until they are dropped.
    pub fn release(&self) -> Result<()> {
        let store = std::mem::replace(&mut self.inner.lock().store, Store::Released);
        let path = match store {
            Store::File { path, .. } | Store::Mapped { path, .. } => path,
            // SpillFile's Drop removes the partial file.
            Store::Spilling(file) => {
                drop(file);
                return Ok(());
            }
            _ => return Ok(()),
        };
        tracing::trace!(buffer = %self.id, path = %path.display(), "releasing buffer");
        fs::remove_path(&path)?;
        Ok(())
    }
}

impl Resource for Buffer {
    fn release(&self) -> Result<()> {
        Buffer::release(self)
    }

    fn is_released(&self) -> bool {
        self.state() == BufferState::Released
    }

    fn describe(&self) -> String {
        format!("{} ({}, {} bytes)", self.id, self.state(), self.len())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(e) = Buffer::release(self) {
            tracing::warn!(buffer = %self.id, error = %e, "failed to release dropped buffer");
        }
    }
}

/// Independent cursor over a finalized buffer.
pub enum BufferReader {
    Memory(Cursor<Bytes>),
    File(BufReader<File>),
    Mapped(MappedReader),
}

impl BufferReader {
    pub fn is_mapped(&self) -> bool {
        matches!(self, BufferReader::Mapped(_))
    }
}

impl Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BufferReader::Memory(c) => c.read(buf),
            BufferReader::File(f) => f.read(buf),
            BufferReader::Mapped(m) => m.read(buf),
        }
    }
}

impl Seek for BufferReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            BufferReader::Memory(c) => c.seek(pos),
            BufferReader::File(f) => f.seek(pos),
            BufferReader::Mapped(m) => m.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tieredio_core::config::StorageType;
    use tieredio_core::policy::decide;

    fn ctx(dir: &Path, cfg: IoConfig) -> BufferContext {
        BufferContext::new(
            Arc::new(cfg),
            Arc::new(dir.to_path_buf()),
            MemoryGauge::unbounded(),
        )
    }

    fn small_cfg() -> IoConfig {
        IoConfig::default()
            .with_threshold(1024)
            .with_spill_threshold(4096)
            .with_max_preallocate(8192)
    }

    fn fill(buf: &Buffer, total: usize, chunk: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        for c in data.chunks(chunk) {
            buf.append(c).unwrap();
        }
        data
    }

    fn read_all(buf: &Buffer) -> Vec<u8> {
        let mut out = Vec::new();
        buf.reader().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn small_payload_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(Some(500), &c.config), Some(500), c).unwrap();
        let data = fill(&buf, 500, 100);
        assert_eq!(buf.finalize().unwrap(), 500);
        assert_eq!(buf.state(), BufferState::InMemory);
        assert_eq!(read_all(&buf), data);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_size_spills_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        fill(&buf, 4096, 512);
        assert_eq!(buf.state(), BufferState::InMemory);
        buf.append(&[1]).unwrap();
        assert_eq!(buf.state(), BufferState::SpilledToFile);
        buf.finalize().unwrap();

        let path = buf.path().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4097);
        assert_eq!(read_all(&buf).len(), 4097);

        buf.release().unwrap();
        assert!(!path.exists());
        assert_eq!(buf.state(), BufferState::Released);
    }

    #[test]
    fn known_large_size_spills_immediately_with_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(Some(5000), &c.config), Some(5000), c).unwrap();
        assert_eq!(buf.state(), BufferState::SpilledToFile);
        let data = fill(&buf, 5000, 1000);
        buf.finalize().unwrap();
        assert_eq!(std::fs::metadata(buf.path().unwrap()).unwrap().len(), 5000);
        assert_eq!(read_all(&buf), data);
    }

    #[test]
    fn file_preference_spills_middle_band() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = small_cfg();
        cfg.storage = StorageType::File;
        let c = ctx(dir.path(), cfg);
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        fill(&buf, 1025, 1025);
        assert_eq!(buf.state(), BufferState::SpilledToFile);
    }

    #[test]
    fn phases_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        buf.append(b"abc").unwrap();
        assert!(matches!(buf.reader(), Err(Error::BufferState(_))));
        buf.finalize().unwrap();
        assert!(matches!(buf.append(b"d"), Err(Error::BufferState(_))));
        assert!(matches!(buf.append(b""), Err(Error::BufferState(_))));
        assert!(matches!(buf.finalize(), Err(Error::BufferState(_))));
        assert_eq!(read_all(&buf), b"abc");
    }

    #[test]
    fn readers_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(Some(6000), &c.config), Some(6000), c).unwrap();
        fill(&buf, 6000, 700);
        buf.finalize().unwrap();
        let mut a = buf.reader().unwrap();
        let mut b = buf.reader().unwrap();
        let mut first = [0u8; 10];
        a.read_exact(&mut first).unwrap();
        let mut all = Vec::new();
        b.read_to_end(&mut all).unwrap();
        assert_eq!(all.len(), 6000);
        assert_eq!(&all[..10], &first);
    }

    #[test]
    fn mapping_is_lazy_and_survives_release() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_cfg().with_mmap(true).with_mmap_min_size(1024);
        let c = ctx(dir.path(), cfg);
        let buf = Buffer::new(decide(Some(8000), &c.config), Some(8000), c).unwrap();
        let data = fill(&buf, 8000, 1000);
        buf.finalize().unwrap();
        assert_eq!(buf.state(), BufferState::SpilledToFile);

        let mut reader = buf.reader().unwrap();
        assert!(reader.is_mapped());
        assert_eq!(buf.state(), BufferState::Mapped);
        let view = buf.bytes().unwrap();

        buf.release().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(&view[..], &data[..]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_mapping_falls_back_to_file_reads() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_cfg().with_mmap(true).with_mmap_min_size(1024);
        let c = ctx(dir.path(), cfg);
        let buf = Buffer::new(decide(Some(8000), &c.config), Some(8000), c).unwrap();
        let data = fill(&buf, 8000, 1000);
        buf.finalize().unwrap();
        let path = buf.path().unwrap();

        // A file that no longer matches the buffer cannot be mapped.
        std::fs::write(&path, b"short").unwrap();
        drop(buf.reader().unwrap());
        assert_eq!(buf.state(), BufferState::SpilledToFile);

        // The failure is remembered: later reads go through the file.
        std::fs::write(&path, &data).unwrap();
        let mut reader = buf.reader().unwrap();
        assert!(!reader.is_mapped());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(buf.bytes().unwrap().as_ref(), &data[..]);
        assert_eq!(buf.state(), BufferState::SpilledToFile);
    }

    #[test]
    fn small_spills_are_not_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_cfg().with_mmap(true).with_mmap_min_size(1 << 20);
        let c = ctx(dir.path(), cfg);
        let buf = Buffer::new(decide(Some(5000), &c.config), Some(5000), c).unwrap();
        fill(&buf, 5000, 5000);
        buf.finalize().unwrap();
        assert!(!buf.reader().unwrap().is_mapped());
        assert_eq!(buf.state(), BufferState::SpilledToFile);
    }

    #[test]
    fn memory_limit_forces_spill() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IoConfig::default().without_spill_threshold();
        let c = BufferContext::new(
            Arc::new(cfg),
            Arc::new(dir.path().to_path_buf()),
            MemoryGauge::new(Some(1000)),
        );
        let gauge = c.gauge.clone();
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        fill(&buf, 900, 100);
        assert_eq!(gauge.used_bytes(), 900);
        buf.append(&[0u8; 200]).unwrap();
        assert_eq!(buf.state(), BufferState::SpilledToFile);
        assert_eq!(gauge.used_bytes(), 0);
        assert_eq!(buf.len(), 1100);
    }

    #[test]
    fn dropping_unfinished_buffer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(Some(10_000), &c.config), Some(10_000), c).unwrap();
        fill(&buf, 3000, 1000);
        drop(buf);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn from_bytes_is_zero_copy_and_checksummed() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg().with_checksum(true));
        let data = Bytes::from_static(b"static payload");
        let buf = Buffer::from_bytes(data.clone(), c).unwrap();
        assert!(buf.is_finalized());
        assert_eq!(buf.bytes().unwrap().as_ptr(), data.as_ptr());
        assert_eq!(buf.digest(), Some(*blake3::hash(b"static payload").as_bytes()));
    }

    #[test]
    fn streaming_digest_matches_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg().with_checksum(true));
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        let data = fill(&buf, 10_000, 333);
        buf.finalize().unwrap();
        assert_eq!(buf.digest(), Some(*blake3::hash(&data).as_bytes()));
    }

    #[test]
    fn persist_to_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path(), small_cfg());
        let buf = Buffer::new(decide(None, &c.config), None, c).unwrap();
        let data = fill(&buf, 5000, 64);
        buf.finalize().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("kept.bin");
        assert_eq!(buf.persist_to(&dest).unwrap(), 5000);
        buf.release().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }
}
