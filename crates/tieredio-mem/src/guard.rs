//! Memory gauge + RAII reservations.
//!
//! Every in-memory buffer holds a [`Reservation`] sized to the bytes it keeps.
//! Dropping the reservation returns the bytes to the gauge (panic-safe). With a
//! limit configured, a reservation that cannot grow tells the buffer to spill.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::tracking::PeakTracker;

#[derive(Debug)]
struct GaugeInner {
    limit: Option<u64>,
    used: AtomicU64,
    peak: PeakTracker,
}

impl GaugeInner {
    fn try_acquire(&self, bytes: u64) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if let Some(limit) = self.limit {
                if next > limit {
                    return false;
                }
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.peak.record_used(next);
                return true;
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Shared counter of bytes held in memory by live buffers.
#[derive(Debug, Clone)]
pub struct MemoryGauge {
    inner: Arc<GaugeInner>,
}

impl Default for MemoryGauge {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MemoryGauge {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                limit,
                used: AtomicU64::new(0),
                peak: PeakTracker::new(),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn limit(&self) -> Option<u64> {
        self.inner.limit
    }

    /// Current usage (advisory).
    pub fn used_bytes(&self) -> u64 {
        self.inner.used.load(Ordering::Relaxed)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.inner.peak.peak()
    }

    pub fn try_reserve(&self, bytes: u64) -> Option<Reservation> {
        if bytes == 0 || self.inner.try_acquire(bytes) {
            Some(Reservation {
                inner: Arc::clone(&self.inner),
                bytes,
            })
        } else {
            None
        }
    }
}

/// RAII guard that accounts for a number of bytes.
/// Dropping it returns bytes to the gauge.
#[derive(Debug)]
pub struct Reservation {
    inner: Arc<GaugeInner>,
    bytes: u64,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Try to resize this reservation to a new byte count.
    /// Shrinking always succeeds; growing fails if the limit would be exceeded.
    pub fn try_resize(&mut self, new_bytes: u64) -> bool {
        if new_bytes == self.bytes {
            return true;
        }

        if new_bytes < self.bytes {
            self.inner.release(self.bytes - new_bytes);
            self.bytes = new_bytes;
            true
        } else if self.inner.try_acquire(new_bytes - self.bytes) {
            self.bytes = new_bytes;
            true
        } else {
            false
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            // NOTE: do not log here to keep drop path fast.
            self.bytes = 0;
        }
    }
}
