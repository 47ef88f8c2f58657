//! Tiering policy: where a payload should live given its size hint.
//!
//! Everything here is a pure function of `(size, config)` so placement can be
//! tested without touching the filesystem.

use serde::{Deserialize, Serialize};

use crate::config::{IoConfig, StorageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Memory,
    File,
}

/// Initial placement decision for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub medium: Medium,
    /// Bytes to reserve up front (buffer capacity or file length).
    pub preallocate: u64,
    /// The size was unknown; the buffer must consult [`should_spill`] as it grows.
    pub reevaluate: bool,
}

impl Placement {
    pub fn keep_in_memory(&self) -> bool {
        self.medium == Medium::Memory
    }

    pub fn spill_immediately(&self) -> bool {
        self.medium == Medium::File
    }
}

/// Decide the initial placement for a payload.
///
/// Rules, first match wins:
/// 1. known size `<= threshold`: memory.
/// 2. known size `> spill_threshold`: file.
/// 3. unknown size: memory, no preallocation, re-evaluate per chunk.
/// 4. known size between the two: follow `storage`.
pub fn decide(size_hint: Option<u64>, cfg: &IoConfig) -> Placement {
    let Some(size) = size_hint else {
        return Placement {
            medium: Medium::Memory,
            preallocate: 0,
            reevaluate: true,
        };
    };

    let preallocate = size.min(cfg.max_preallocate);

    let medium = if size <= cfg.threshold {
        Medium::Memory
    } else if exceeds_spill_threshold(size, cfg) {
        Medium::File
    } else {
        match cfg.storage {
            StorageType::Memory => Medium::Memory,
            StorageType::File => Medium::File,
        }
    };

    Placement {
        medium,
        preallocate,
        reevaluate: false,
    }
}

/// Re-evaluation for a buffer that is still in memory after `accumulated` bytes.
pub fn should_spill(accumulated: u64, cfg: &IoConfig) -> bool {
    if exceeds_spill_threshold(accumulated, cfg) {
        return true;
    }
    cfg.storage == StorageType::File && accumulated > cfg.threshold
}

fn exceeds_spill_threshold(size: u64, cfg: &IoConfig) -> bool {
    match cfg.spill_threshold {
        Some(limit) => size > limit,
        None => false,
    }
}
