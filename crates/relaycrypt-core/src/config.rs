use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TransferError, TransferResult};

const MIB: u64 = 1024 * 1024;

/// Top-level client configuration (loaded from relaycrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaycryptConfig {
    pub relay: RelayConfig,
    pub transfer: TransferSettings,
    pub environment: EnvironmentConfig,
    pub log: LogConfig,
}

impl RelaycryptConfig {
    pub fn validate(&self) -> TransferResult<()> {
        self.transfer.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Default relay base URL, used when a command is given a bare token
    pub base_url: Option<String>,
    /// Refuse plaintext `http://` relays (warn only when false)
    pub enforce_tls: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            enforce_tls: false,
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// What happens to sibling files when one file in a batch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop launching new files and fail the batch once in-flight files settle
    #[default]
    AbortBatch,
    /// Let the remaining files run; the batch still reports the first failure
    ContinueSiblings,
}

/// Chunk transfer tuning shared by the upload and download orchestrators.
///
/// `chunk_size` must match between sender and receiver: both sides derive
/// chunk counts and nonce counters from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub chunk_size: u64,
    pub max_concurrent_chunks: usize,
    pub max_concurrent_files: usize,
    /// Total attempts per chunk/request, including the first one
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    /// Files larger than this stream to disk when incremental writes are available
    pub disk_stream_threshold: u64,
    /// Warn before buffering a file larger than this share of available memory
    pub memory_warning_ratio: f64,
    pub failure_policy: FailurePolicy,
    /// Compare a running SHA-256 of the plaintext against the relay's digest
    pub verify_digest: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::local()
    }
}

impl TransferSettings {
    /// Direct connection to the relay: large chunks, wide window.
    pub fn local() -> Self {
        Self {
            chunk_size: 10 * MIB,
            max_concurrent_chunks: 8,
            max_concurrent_files: 3,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            retry_jitter: true,
            disk_stream_threshold: 64 * MIB,
            memory_warning_ratio: 0.5,
            failure_policy: FailurePolicy::AbortBatch,
            verify_digest: false,
        }
    }

    /// Relay reached through a tunnel: small chunks, narrow window.
    pub fn tunnel() -> Self {
        Self {
            chunk_size: MIB,
            max_concurrent_chunks: 2,
            ..Self::local()
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.max_concurrent_chunks == 0 || self.max_concurrent_files == 0 {
            return Err(TransferError::Config(
                "transfer.max_concurrent_chunks and max_concurrent_files must be >= 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TransferError::Config("transfer.max_attempts must be >= 1".into()));
        }
        if !(self.memory_warning_ratio > 0.0 && self.memory_warning_ratio <= 1.0) {
            return Err(TransferError::Config(format!(
                "transfer.memory_warning_ratio must be in (0, 1], got {}",
                self.memory_warning_ratio
            )));
        }
        Ok(())
    }
}

/// Static answers for the environment probe (no runtime probing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Whether downloads may stream straight to disk
    pub incremental_write: bool,
    /// Memory considered safe to use, in MiB (unknown when unset)
    pub available_memory_mb: Option<u64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            incremental_write: true,
            available_memory_mb: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
