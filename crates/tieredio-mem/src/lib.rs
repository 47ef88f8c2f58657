#![deny(unsafe_code)]
//! tieredio-mem: tiered buffers, the memory gauge, and releasable resources.
//!
//! A [`Buffer`] holds one payload in memory, in a spill file, or in a memory
//! mapping of that file. In-memory bytes are accounted through a
//! [`MemoryGauge`] with RAII [`Reservation`]s. Sessions own buffers through the
//! [`Resource`] trait and hand out spill directories through [`SpillTarget`].
//!
//! Only `spill::mapped` uses `unsafe`, for the mapping itself.

pub mod buffer;
pub mod guard;
pub mod resource;
pub mod spill;
pub mod tracking;

pub use buffer::{Buffer, BufferContext, BufferReader, BufferState};
pub use guard::{MemoryGauge, Reservation};
pub use resource::{Resource, SpillTarget, TempFile};
pub use spill::{MappedFile, MappedReader, SpillFile};
