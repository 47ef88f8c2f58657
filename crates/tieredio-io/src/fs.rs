//! Filesystem primitives consumed by the buffer and session layers, plus a
//! handful of single-path conveniences for callers that do not need tiering.
//!
//! Primitives speak `std::io::Result` so callers can classify the failure
//! (not found vs. permission denied vs. disk full) themselves.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tieredio_core::error::{Error, Result};

/// `stat(2)` following symlinks.
pub fn stat_path(path: &Path) -> io::Result<Metadata> {
    fs::metadata(path)
}

pub fn open_for_read(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Create an empty, uniquely named file in `dir` and hand back the open
/// handle together with its path. The file is *not* removed automatically.
pub fn create_temp_file(dir: &Path, prefix: &str) -> io::Result<(File, PathBuf)> {
    let named = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(dir)?;
    named.keep().map_err(|e| e.error)
}

/// Rename `from` onto `to`, replacing any existing file at `to`.
pub fn rename_atomically(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

/// Remove a file or a directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// `mkdir -p`. No-op for an empty path or ".".
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    if path.as_os_str().is_empty() || path == Path::new(".") {
        return Ok(());
    }
    fs::create_dir_all(path)
}

/// Remove `path` only when it is an empty directory. Returns whether it was
/// removed; a missing directory counts as removed.
pub fn remove_dir_if_empty(path: &Path) -> io::Result<bool> {
    let mut entries = match fs::read_dir(path) {
        Ok(it) => it,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

pub fn exists(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

/// Read up to `limit` bytes; a file larger than `limit` is an error.
/// A `limit` of 0 reads the whole file.
pub fn read_limit(path: &Path, limit: u64) -> Result<Vec<u8>> {
    let mut f = open_for_read(path)?;
    let mut out = Vec::new();
    if limit == 0 {
        f.read_to_end(&mut out)?;
        return Ok(out);
    }
    f.take(limit.saturating_add(1)).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(Error::SizeExceedsLimit { limit });
    }
    Ok(out)
}

/// Read `len` bytes at `offset`. Short reads at EOF return fewer bytes.
pub fn read_at(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut f = open_for_read(path)?;
    f.seek(SeekFrom::Start(offset))?;
    let mut out = Vec::with_capacity(len);
    f.take(len as u64).read_to_end(&mut out)?;
    Ok(out)
}

/// Write `data` so that `path` is either fully replaced or left untouched:
/// temp file in the same directory, fsync, then rename.
pub fn safe_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    ensure_directory(parent)?;

    let (mut file, tmp) = create_temp_file(parent, ".tieredio-write-")?;
    let written = file
        .write_all(data)
        .and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = remove_path(&tmp);
        return Err(e.into());
    }
    if let Err(e) = rename_atomically(&tmp, path) {
        let _ = remove_path(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Stream `reader` into `path` with the same all-or-nothing guarantee as
/// [`safe_write`]. Returns the number of bytes written.
pub fn safe_write_from(path: &Path, reader: &mut dyn Read) -> Result<u64> {
    let parent = parent_dir(path);
    ensure_directory(parent)?;

    let (mut file, tmp) = create_temp_file(parent, ".tieredio-write-")?;
    let copied = io::copy(reader, &mut file).and_then(|n| file.sync_all().map(|_| n));
    drop(file);
    match copied {
        Ok(n) => {
            if let Err(e) = rename_atomically(&tmp, path) {
                let _ = remove_path(&tmp);
                return Err(e.into());
            }
            Ok(n)
        }
        Err(e) => {
            let _ = remove_path(&tmp);
            Err(Error::from_io_boxed(e))
        }
    }
}

/// Write `data` to a new temp file in `dir` and return its path.
/// The caller owns the file.
pub fn write_temp(dir: &Path, prefix: &str, data: &[u8]) -> Result<PathBuf> {
    let (mut file, path) = create_temp_file(dir, prefix)?;
    if let Err(e) = file.write_all(data) {
        drop(file);
        let _ = remove_path(&path);
        return Err(e.into());
    }
    Ok(path)
}

/// Copy `src` to `dst`, creating `dst`'s parent and preserving permissions.
pub fn copy_file(dst: &Path, src: &Path) -> Result<u64> {
    let mut input = open_for_read(src)?;
    let perms = input.metadata()?.permissions();
    ensure_directory(parent_dir(dst))?;

    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dst)?;
    let n = io::copy(&mut input, &mut out)?;
    fs::set_permissions(dst, perms)?;
    Ok(n)
}

/// Move `src` to `dst`. Falls back to copy + remove when rename fails
/// (e.g. across devices).
pub fn move_path(dst: &Path, src: &Path) -> Result<()> {
    ensure_directory(parent_dir(dst))?;
    match rename_atomically(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e.into()),
        Err(e) => {
            tracing::debug!(src = %src.display(), dst = %dst.display(), error = %e, "rename failed, copying");
        }
    }
    if let Err(e) = copy_file(dst, src) {
        let _ = remove_path(dst);
        return Err(e);
    }
    fs::remove_file(src)?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
