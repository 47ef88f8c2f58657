#![forbid(unsafe_code)]
//! tieredio-io: payload sources and the filesystem primitives the buffer and
//! session layers are built on.
//!
//! - `source`: bytes / path / URL sources behind one `open` call.
//! - `http`: blocking client with retry for URL sources.
//! - `fs`: temp files, atomic rename, idempotent removal, and conveniences.
//! - `buf`: cancellation-aware reader adaptor.

pub mod buf;
pub mod fs;
pub mod http;
pub mod source;

pub use buf::CancelReader;
pub use http::{HttpBody, HttpClient};
pub use source::{Opened, Source, SourceKind, SourceReader};
