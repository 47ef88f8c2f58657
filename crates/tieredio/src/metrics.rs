//! Per-session counters and completion events.
//!
//! Events go through `tracing` at TRACE level under the `tieredio::metrics`
//! target; wire a subscriber in the binary to collect them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tieredio_core::id::SessionId;
use tieredio_io::SourceKind;
use tieredio_mem::BufferState;

#[derive(Debug, Default)]
pub(crate) struct OpCounters {
    copies: AtomicU64,
    bytes_copied: AtomicU64,
    spilled: AtomicU64,
    reads: AtomicU64,
    bytes_read: AtomicU64,
}

impl OpCounters {
    pub(crate) fn record_copy(&self, bytes: u64, state: BufferState) {
        self.copies.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
        if matches!(state, BufferState::SpilledToFile | BufferState::Mapped) {
            self.spilled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Point-in-time view of a session, cheap enough to log on every cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session: SessionId,
    pub cleaned: bool,
    pub resources: usize,
    pub copies: u64,
    pub bytes_copied: u64,
    /// Copies whose buffer ended up on disk.
    pub spilled: u64,
    pub reads: u64,
    pub bytes_read: u64,
}

impl SessionStats {
    pub(crate) fn snapshot(
        session: SessionId,
        cleaned: bool,
        resources: usize,
        c: &OpCounters,
    ) -> Self {
        Self {
            session,
            cleaned,
            resources,
            copies: c.copies.load(Ordering::Relaxed),
            bytes_copied: c.bytes_copied.load(Ordering::Relaxed),
            spilled: c.spilled.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            bytes_read: c.bytes_read.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn copy_completed(
    session: SessionId,
    source: SourceKind,
    state: BufferState,
    bytes: u64,
    elapsed: Duration,
) {
    tracing::trace!(
        target: "tieredio::metrics",
        event = "copy.completed",
        %session,
        source = source.as_str(),
        placement = %state,
        bytes,
        elapsed_us = elapsed.as_micros() as u64,
    );
}

pub(crate) fn read_completed(source: SourceKind, bytes: u64, elapsed: Duration) {
    tracing::trace!(
        target: "tieredio::metrics",
        event = "read.completed",
        source = source.as_str(),
        bytes,
        elapsed_us = elapsed.as_micros() as u64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_split_spilled_copies() {
        let c = OpCounters::default();
        c.record_copy(10, BufferState::InMemory);
        c.record_copy(5000, BufferState::SpilledToFile);
        c.record_copy(9000, BufferState::Mapped);
        c.record_read(7);

        let id = SessionId::new(3);
        let s = SessionStats::snapshot(id, false, 3, &c);
        assert_eq!(s.copies, 3);
        assert_eq!(s.bytes_copied, 14010);
        assert_eq!(s.spilled, 2);
        assert_eq!((s.reads, s.bytes_read), (1, 7));

        let json = serde_json::to_string(&s).unwrap();
        let back: SessionStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
