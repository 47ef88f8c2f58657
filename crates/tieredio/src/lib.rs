#![forbid(unsafe_code)]
//! tieredio: move payloads from bytes, files, or URLs into memory, spill
//! files, or memory maps, with every temp resource owned by a session.
//!
//! ```no_run
//! use tieredio::{copy, IoConfig, IoManager, OutKind, Source, StorageType};
//!
//! let mgr = IoManager::new(IoConfig::new("", StorageType::Memory))?;
//! let text = mgr.with_session(|ctx| {
//!     copy(ctx, &Source::path("notes.txt"), OutKind::Text)
//! })?;
//! # Ok::<(), tieredio::Error>(())
//! ```

pub mod context;
pub mod manager;
pub mod metrics;
pub mod ops;
pub mod output;
pub mod session;

pub use context::Context;
pub use manager::IoManager;
pub use metrics::SessionStats;
pub use ops::{copy, read};
pub use output::{out, OutKind, Output, OutputSpec};
pub use session::{Session, SessionState};

pub use tieredio_core::cancel::{CancelScope, CancelToken};
pub use tieredio_core::config::{HttpConfig, IoConfig, RetryConfig, StorageType};
pub use tieredio_core::error::{Error, Result, SourceErrorKind};
pub use tieredio_core::policy::{decide, should_spill, Medium, Placement};
pub use tieredio_io::{fs, Source, SourceKind};
pub use tieredio_mem::{Buffer, BufferReader, BufferState, MemoryGauge, Resource, TempFile};
