#![forbid(unsafe_code)]
//! tieredio-core: configuration, the tiering policy, ids, cancellation and
//! the error taxonomy shared by every tieredio crate.
//!
//! No filesystem or network IO lives here.

pub mod cancel;
pub mod config;
pub mod error;
pub mod id;
pub mod policy;
pub mod prelude;

pub use cancel::{CancelScope, CancelToken};
pub use config::{HttpConfig, IoConfig, RetryConfig, StorageType};
pub use error::{Error, Result, SourceErrorKind};
pub use policy::{decide, should_spill, Medium, Placement};
