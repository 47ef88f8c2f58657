//! What `copy` hands back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use tieredio_core::error::{Error, Result};
use tieredio_io::fs;
use tieredio_mem::{Buffer, Resource, TempFile};

use crate::session::Session;

pub const OUTPUT_PREFIX: &str = "tieredio-out-";

/// Requested result representation. New kinds may be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum OutKind {
    #[default]
    Bytes,
    /// Strict UTF-8.
    Text,
    /// A file the session owns: the spill file, or one written on demand.
    Path,
    /// The registered buffer itself.
    Buffer,
}

impl OutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutKind::Bytes => "bytes",
            OutKind::Text => "text",
            OutKind::Path => "path",
            OutKind::Buffer => "buffer",
        }
    }
}

impl fmt::Display for OutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" | "raw" => Ok(OutKind::Bytes),
            "text" | "txt" => Ok(OutKind::Text),
            "path" | "file" => Ok(OutKind::Path),
            "buffer" => Ok(OutKind::Buffer),
            other => Err(Error::ConfigurationInvalid(format!(
                "unknown output kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputSpec {
    pub kind: OutKind,
}

impl OutputSpec {
    pub fn new(kind: OutKind) -> Self {
        Self { kind }
    }
}

impl From<OutKind> for OutputSpec {
    fn from(kind: OutKind) -> Self {
        Self { kind }
    }
}

/// Shorthand for `OutputSpec::new(kind)`.
pub fn out(kind: OutKind) -> OutputSpec {
    OutputSpec::new(kind)
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Output {
    Bytes(Bytes),
    Text(String),
    Path(PathBuf),
    Buffer(Arc<Buffer>),
}

impl Output {
    pub fn kind(&self) -> OutKind {
        match self {
            Output::Bytes(_) => OutKind::Bytes,
            Output::Text(_) => OutKind::Text,
            Output::Path(_) => OutKind::Path,
            Output::Buffer(_) => OutKind::Buffer,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Output::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Output::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<Buffer>> {
        match self {
            Output::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Output::Bytes(b) => Some(b),
            Output::Text(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }
}

/// Turn a finalized, registered buffer into the requested representation.
pub(crate) fn convert(session: &Session, buffer: Arc<Buffer>, spec: OutputSpec) -> Result<Output> {
    match spec.kind {
        OutKind::Bytes => Ok(Output::Bytes(buffer.bytes()?)),
        OutKind::Text => {
            let data = buffer.bytes()?;
            let text = std::str::from_utf8(&data)
                .map_err(|e| Error::OutputConversionFailed(format!("not valid UTF-8: {e}")))?;
            Ok(Output::Text(text.to_owned()))
        }
        OutKind::Path => {
            if let Some(path) = buffer.path() {
                return Ok(Output::Path(path));
            }
            materialize_path(session, &buffer).map(Output::Path)
        }
        OutKind::Buffer => Ok(Output::Buffer(buffer)),
    }
}

/// Write an in-memory buffer to a new session-owned file.
fn materialize_path(session: &Session, buffer: &Buffer) -> Result<PathBuf> {
    let dir = session.spill_dir()?;
    let data = buffer.bytes()?;
    let path = fs::write_temp(&dir, OUTPUT_PREFIX, &data)
        .map_err(|e| Error::OutputConversionFailed(format!("writing {}: {e}", dir.display())))?;
    let file = Arc::new(TempFile::new(path.clone()));
    if let Err(e) = session.register(file.clone()) {
        file.release()?;
        return Err(e);
    }
    tracing::debug!(session = %session.id(), buffer = %buffer.id(), path = %path.display(), "materialized path output");
    Ok(path)
}
