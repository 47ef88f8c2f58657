//! Strongly-typed identifiers used across the workspace.
//!
//! Downstream crates should *not* pass raw integers around for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Allocate the next id from a process-wide counter.
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(ManagerId);
new_id!(SessionId);
new_id!(BufferId);

/// Unique, filesystem-safe token used to name lease and session directories.
///
/// Counters are only unique within one process; directory names must not
/// collide with another process sharing the same base directory.
pub fn unique_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
