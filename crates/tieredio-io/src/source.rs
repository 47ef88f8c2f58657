//! Where payload bytes come from.
//!
//! A [`Source`] is only a description; nothing happens until [`Source::open`],
//! and every call to `open` yields an independent stream.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tieredio_core::cancel::CancelScope;
use tieredio_core::error::{Error, Result, SourceErrorKind};

use crate::fs;
use crate::http::HttpClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// In-memory bytes. Opening hands out a view, never a copy.
    Bytes(Bytes),
    Path(PathBuf),
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Bytes,
    Path,
    Url,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Bytes => "bytes",
            SourceKind::Path => "path",
            SourceKind::Url => "url",
        }
    }
}

impl Source {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Source::Bytes(data.into())
    }

    /// Borrow caller-owned static data without copying it.
    pub fn from_static(data: &'static [u8]) -> Self {
        Source::Bytes(Bytes::from_static(data))
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Source::Path(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Source::Url(url.into())
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Bytes(_) => SourceKind::Bytes,
            Source::Path(_) => SourceKind::Path,
            Source::Url(_) => SourceKind::Url,
        }
    }

    /// Length without opening, when that is cheap: free for bytes, a stat
    /// for paths, unknown for URLs.
    pub fn size_hint(&self) -> Result<Option<u64>> {
        match self {
            Source::Bytes(b) => Ok(Some(b.len() as u64)),
            Source::Path(p) => stat_source(p).map(Some),
            Source::Url(_) => Ok(None),
        }
    }

    pub fn open(&self, scope: &CancelScope, http: &HttpClient) -> Result<Opened> {
        scope.check()?;
        let opened = match self {
            Source::Bytes(b) => Opened {
                len: Some(b.len() as u64),
                reader: SourceReader::Bytes(Cursor::new(b.clone())),
            },
            Source::Path(p) => {
                let len = stat_source(p)?;
                let file = fs::open_for_read(p).map_err(|e| open_error(p, &e))?;
                Opened {
                    len: Some(len),
                    reader: SourceReader::File(file),
                }
            }
            Source::Url(u) => {
                let body = http.get(u, scope)?;
                Opened {
                    len: body.len,
                    reader: SourceReader::Http(body.reader),
                }
            }
        };
        // The stream is dropped (closed) if the scope ended while we blocked.
        scope.check()?;
        Ok(opened)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Source::Path(p) => write!(f, "{}", p.display()),
            Source::Url(u) => f.write_str(u),
        }
    }
}

impl From<Bytes> for Source {
    fn from(b: Bytes) -> Self {
        Source::Bytes(b)
    }
}

impl From<Vec<u8>> for Source {
    fn from(v: Vec<u8>) -> Self {
        Source::Bytes(Bytes::from(v))
    }
}

impl From<PathBuf> for Source {
    fn from(p: PathBuf) -> Self {
        Source::Path(p)
    }
}

impl From<&Path> for Source {
    fn from(p: &Path) -> Self {
        Source::Path(p.to_path_buf())
    }
}

fn stat_source(path: &Path) -> Result<u64> {
    let meta = fs::stat_path(path).map_err(|e| open_error(path, &e))?;
    if meta.is_dir() {
        return Err(Error::source_open(
            path.display().to_string(),
            SourceErrorKind::Other("is a directory".into()),
        ));
    }
    Ok(meta.len())
}

fn open_error(path: &Path, err: &io::Error) -> Error {
    Error::source_open(path.display().to_string(), SourceErrorKind::from_io(err))
}

/// An opened source stream plus the exact length when it is known.
pub struct Opened {
    pub reader: SourceReader,
    pub len: Option<u64>,
}

pub enum SourceReader {
    Bytes(Cursor<Bytes>),
    File(File),
    Http(Box<dyn Read + Send + Sync + 'static>),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::Bytes(c) => c.read(buf),
            SourceReader::File(f) => f.read(buf),
            SourceReader::Http(r) => r.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_source_is_zero_copy_and_reopenable() {
        let data = Bytes::from_static(b"hello");
        let src = Source::Bytes(data.clone());
        let http = HttpClient::default();
        let scope = CancelScope::default();

        for _ in 0..2 {
            let opened = src.open(&scope, &http).unwrap();
            assert_eq!(opened.len, Some(5));
            match opened.reader {
                SourceReader::Bytes(c) => {
                    assert_eq!(c.get_ref().as_ptr(), data.as_ptr());
                }
                _ => panic!("expected bytes reader"),
            }
        }
    }

    #[test]
    fn path_source_reports_stat_length() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("in.bin");
        std::fs::write(&p, vec![7u8; 5000]).unwrap();

        let src = Source::path(&p);
        assert_eq!(src.size_hint().unwrap(), Some(5000));
        let mut opened = src
            .open(&CancelScope::default(), &HttpClient::default())
            .unwrap();
        assert_eq!(opened.len, Some(5000));
        let mut out = Vec::new();
        opened.reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 5000);
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let src = Source::path(dir.path().join("missing"));
        let err = src
            .open(&CancelScope::default(), &HttpClient::default())
            .err()
            .expect("should fail");
        match err {
            Error::SourceOpenFailed { kind, .. } => assert_eq!(kind, SourceErrorKind::NotFound),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn directory_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = Source::path(dir.path()).size_hint().unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }

    #[test]
    fn display_names_the_source() {
        assert_eq!(Source::from_static(b"abc").to_string(), "bytes[3]");
        assert_eq!(Source::url("http://h/x").to_string(), "http://h/x");
        assert_eq!(Source::url("http://h/x").kind().as_str(), "url");
    }
}
