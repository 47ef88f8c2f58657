//! Convenient re-exports for downstream crates.

pub use crate::cancel::{CancelScope, CancelToken};
pub use crate::config::{HttpConfig, IoConfig, RetryConfig, StorageType};
pub use crate::error::{Error, Result, SourceErrorKind};
pub use crate::id::{BufferId, ManagerId, SessionId};
pub use crate::policy::{decide, should_spill, Medium, Placement};
