use std::fmt;

use thiserror::Error;

use crate::id::SessionId;

/// Canonical result used across every tieredio crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a source could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    AccessDenied,
    /// DNS, connection refused, timeouts and other failures below HTTP.
    Transport(String),
    /// The server answered with a non-success status.
    Remote { status: u16 },
    Other(String),
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceErrorKind::NotFound => f.write_str("not found"),
            SourceErrorKind::AccessDenied => f.write_str("access denied"),
            SourceErrorKind::Transport(msg) => write!(f, "transport error: {msg}"),
            SourceErrorKind::Remote { status } => write!(f, "remote status {status}"),
            SourceErrorKind::Other(msg) => f.write_str(msg),
        }
    }
}

impl SourceErrorKind {
    /// Classify a filesystem error raised while opening or stat-ing a path.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SourceErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => SourceErrorKind::AccessDenied,
            _ => SourceErrorKind::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open source '{source_desc}': {kind}")]
    SourceOpenFailed {
        source_desc: String,
        kind: SourceErrorKind,
    },

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("no session attached to context")]
    NoSessionInContext,

    #[error("{session} is already cleaned up")]
    SessionAlreadyCleaned { session: SessionId },

    #[error("io manager is closed")]
    ManagerClosed,

    #[error("spill to file failed: {0}")]
    SpillFailed(String),

    // Mapping is an optimization; callers degrade to buffered file access.
    #[error("memory mapping failed: {0}")]
    MappingFailed(String),

    #[error("output conversion failed: {0}")]
    OutputConversionFailed(String),

    #[error("invalid buffer state: {0}")]
    BufferState(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("size exceeds limit of {limit} bytes")]
    SizeExceedsLimit { limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn source_open(source_desc: impl Into<String>, kind: SourceErrorKind) -> Self {
        Error::SourceOpenFailed {
            source_desc: source_desc.into(),
            kind,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::SourceOpenFailed { kind, .. } => *kind == SourceErrorKind::NotFound,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// HTTP status carried by a remote open failure, if any.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Error::SourceOpenFailed {
                kind: SourceErrorKind::Remote { status },
                ..
            } => Some(*status),
            _ => None,
        }
    }

    /// True for cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Recover a tieredio error that was smuggled through `std::io::Error`
    /// (readers handed to callbacks can only speak `io::Error`).
    pub fn from_io_boxed(err: std::io::Error) -> Self {
        if err.get_ref().map_or(false, |inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(e) = inner.downcast::<Error>() {
                    return *e;
                }
            }
            return Error::Io(std::io::Error::other("unrecoverable wrapped error"));
        }
        Error::Io(err)
    }

    /// Wrap this error into an `io::Error` so it can cross a `Read` boundary.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}
