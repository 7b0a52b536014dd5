//! Environment capabilities consulted when choosing an output sink.

use relaycrypt_core::config::EnvironmentConfig;
use tracing::warn;

pub trait EnvironmentProbe: Send + Sync {
    /// Whether chunks can be streamed to storage as they arrive.
    fn supports_incremental_write(&self) -> bool;

    /// Estimated bytes of memory available, if known.
    fn available_memory(&self) -> Option<u64>;
}

/// Capabilities fixed up front, usually from the `[environment]` config.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    incremental_write: bool,
    available_memory: Option<u64>,
}

impl StaticProbe {
    pub fn new(incremental_write: bool, available_memory: Option<u64>) -> Self {
        Self {
            incremental_write,
            available_memory,
        }
    }

    pub fn from_config(cfg: &EnvironmentConfig) -> Self {
        Self::new(
            cfg.incremental_write,
            cfg.available_memory_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
        )
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::from_config(&EnvironmentConfig::default())
    }
}

impl EnvironmentProbe for StaticProbe {
    fn supports_incremental_write(&self) -> bool {
        self.incremental_write
    }

    fn available_memory(&self) -> Option<u64> {
        self.available_memory
    }
}

/// Asked before buffering a file large enough to strain memory.
/// Returning false cancels the download.
pub trait MemoryPressureHandler: Send + Sync {
    fn confirm(&self, name: &str, expected_bytes: u64, available_bytes: u64) -> bool;
}

/// Log a warning and carry on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceedOnPressure;

impl MemoryPressureHandler for ProceedOnPressure {
    fn confirm(&self, name: &str, expected_bytes: u64, available_bytes: u64) -> bool {
        warn!(
            path = name,
            bytes = expected_bytes,
            available = available_bytes,
            "buffering a large file in memory"
        );
        true
    }
}

/// Refuse, for callers that would rather fail than risk running out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefuseOnPressure;

impl MemoryPressureHandler for RefuseOnPressure {
    fn confirm(&self, name: &str, expected_bytes: u64, available_bytes: u64) -> bool {
        warn!(
            path = name,
            bytes = expected_bytes,
            available = available_bytes,
            "refusing to buffer a large file in memory"
        );
        false
    }
}
