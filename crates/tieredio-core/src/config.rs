//! Manager configuration that downstream crates can serialize/deserialize.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Preferred storage medium when the policy has no size-based override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    File,
}

impl std::str::FromStr for StorageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageType::Memory),
            "file" | "disk" => Ok(StorageType::File),
            other => Err(Error::ConfigurationInvalid(format!(
                "unknown storage type '{other}'"
            ))),
        }
    }
}

/// Retry policy for remote sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    /// Per-read socket timeout. A stalled body read fails after this long.
    pub read_timeout_ms: u64,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            user_agent: concat!("tieredio/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Root directory for spill files. `None` resolves to the system temp dir.
    pub base_dir: Option<PathBuf>,

    /// Medium preference for payloads between `threshold` and `spill_threshold`.
    pub storage: StorageType,

    /// Payloads at or below this many bytes always stay in memory.
    pub threshold: u64,

    /// Payloads above this many bytes always go to a temp file.
    /// `None` disables the boundary. `Some(0)` spills everything that `threshold`
    /// does not keep in memory.
    pub spill_threshold: Option<u64>,

    /// Upper bound on bytes reserved up front from a size hint. 0 disables.
    pub max_preallocate: u64,

    /// Expose spilled files through a memory mapping on read-back.
    pub mmap_enabled: bool,

    /// Files at or below this size are read with plain syscalls even when
    /// mapping is enabled.
    pub mmap_min_size: u64,

    /// Manager-wide cap on bytes held in memory by live buffers.
    /// Growing past it forces the growing buffer to spill.
    pub memory_limit: Option<u64>,

    /// Read size used when streaming a source into a buffer.
    pub chunk_size: usize,

    /// Compute a blake3 digest of every materialized payload.
    pub checksum: bool,

    pub http: HttpConfig,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            storage: StorageType::Memory,
            threshold: 256 * 1024,                   // 256 KiB
            spill_threshold: Some(32 * 1024 * 1024), // 32 MiB
            max_preallocate: 8 * 1024 * 1024,        // 8 MiB
            mmap_enabled: false,
            mmap_min_size: 64 * 1024,
            memory_limit: None,
            chunk_size: 64 * 1024,
            checksum: false,
            http: HttpConfig::default(),
        }
    }
}

impl IoConfig {
    /// Start from defaults with the two positional knobs every caller sets.
    pub fn new(base_dir: impl Into<PathBuf>, storage: StorageType) -> Self {
        let base: PathBuf = base_dir.into();
        Self {
            base_dir: if base.as_os_str().is_empty() {
                None
            } else {
                Some(base)
            },
            storage,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes;
        self
    }

    pub fn with_spill_threshold(mut self, bytes: u64) -> Self {
        self.spill_threshold = Some(bytes);
        self
    }

    pub fn without_spill_threshold(mut self) -> Self {
        self.spill_threshold = None;
        self
    }

    pub fn with_max_preallocate(mut self, bytes: u64) -> Self {
        self.max_preallocate = bytes;
        self
    }

    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.mmap_enabled = enabled;
        self
    }

    pub fn with_mmap_min_size(mut self, bytes: u64) -> Self {
        self.mmap_min_size = bytes;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Resolved spill root (configured directory or the system temp dir).
    pub fn resolved_base_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => std::env::temp_dir(),
        }
    }

    /// Check the invariants that do not need the filesystem.
    pub fn validate(&self) -> Result<()> {
        if let Some(spill) = self.spill_threshold {
            if self.threshold != 0 && spill != 0 && self.threshold > spill {
                return Err(Error::ConfigurationInvalid(format!(
                    "threshold ({}) must not exceed spill_threshold ({})",
                    self.threshold, spill
                )));
            }
        }
        if self.chunk_size == 0 {
            return Err(Error::ConfigurationInvalid(
                "chunk_size must be greater than zero".into(),
            ));
        }
        let retry = &self.http.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(Error::ConfigurationInvalid(format!(
                "initial backoff ({}ms) exceeds max backoff ({}ms)",
                retry.initial_backoff_ms, retry.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TIEREDIO_BASE_DIR`: spill root directory
    /// - `TIEREDIO_STORAGE`: `memory` or `file`
    /// - `TIEREDIO_THRESHOLD`: in-memory threshold in bytes
    /// - `TIEREDIO_SPILL_THRESHOLD`: spill boundary in bytes (`none` disables)
    /// - `TIEREDIO_MAX_PREALLOCATE`: preallocation cap in bytes
    /// - `TIEREDIO_MMAP`: `1`/`true`/`on` to enable mapping
    /// - `TIEREDIO_MMAP_MIN_SIZE`: mapping floor in bytes
    /// - `TIEREDIO_MEMORY_LIMIT`: manager-wide in-memory cap in bytes
    /// - `TIEREDIO_CHUNK_SIZE`: streaming chunk size in bytes
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TIEREDIO_BASE_DIR") {
            if !s.trim().is_empty() {
                cfg.base_dir = Some(PathBuf::from(s));
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_STORAGE") {
            if let Ok(v) = s.parse::<StorageType>() {
                cfg.storage = v;
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_THRESHOLD") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.threshold = v;
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_SPILL_THRESHOLD") {
            if s.trim().eq_ignore_ascii_case("none") {
                cfg.spill_threshold = None;
            } else if let Ok(v) = s.parse::<u64>() {
                cfg.spill_threshold = Some(v);
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_MAX_PREALLOCATE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_preallocate = v;
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_MMAP") {
            if let Some(v) = parse_bool(&s) {
                cfg.mmap_enabled = v;
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_MMAP_MIN_SIZE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.mmap_min_size = v;
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_MEMORY_LIMIT") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.memory_limit = Some(v);
            }
        }

        if let Ok(s) = std::env::var("TIEREDIO_CHUNK_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                if v > 0 {
                    cfg.chunk_size = v;
                }
            }
        }

        cfg
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_ordering_is_enforced() {
        let cfg = IoConfig::default()
            .with_threshold(4096)
            .with_spill_threshold(1024);
        assert!(matches!(
            cfg.validate(),
            Err(Error::ConfigurationInvalid(_))
        ));

        // Zero on either side switches the ordering check off.
        let cfg = IoConfig::default().with_threshold(4096).with_spill_threshold(0);
        assert!(cfg.validate().is_ok());
        let cfg = IoConfig::default().with_threshold(0).with_spill_threshold(10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_base_dir_means_temp() {
        let cfg = IoConfig::new("", StorageType::File);
        assert!(cfg.base_dir.is_none());
        assert_eq!(cfg.resolved_base_dir(), std::env::temp_dir());
    }

    #[test]
    fn parses_storage_and_bools() {
        assert_eq!("FILE".parse::<StorageType>().unwrap(), StorageType::File);
        assert!("tape".parse::<StorageType>().is_err());
        assert_eq!(parse_bool(" On "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: IoConfig =
            serde_json::from_str(r#"{"storage":"file","spill_threshold":null}"#).unwrap();
        assert_eq!(cfg.storage, StorageType::File);
        assert_eq!(cfg.spill_threshold, None);
        assert_eq!(cfg.chunk_size, IoConfig::default().chunk_size);
    }
}
