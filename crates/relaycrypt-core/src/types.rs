use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{TransferError, TransferResult};

/// Fixed-size chunking of one file.
///
/// Chunk `i` covers `[i * C, min((i + 1) * C, size))`. A zero-byte file has
/// zero chunks. The chunk index doubles as the 32-bit nonce counter, so a
/// layout needing more than `u32::MAX + 1` chunks is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkLayout {
    pub fn new(size: u64, chunk_size: u64) -> TransferResult<Self> {
        if chunk_size == 0 {
            return Err(TransferError::Config("chunk size must be > 0".into()));
        }
        let total = size.div_ceil(chunk_size);
        let total_chunks = u32::try_from(total).map_err(|_| {
            TransferError::Config(format!(
                "file of {size} bytes needs {total} chunks of {chunk_size} bytes; \
                 the nonce counter allows at most {}",
                u32::MAX
            ))
        })?;
        Ok(Self {
            size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.total_chunks == 0
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    pub fn byte_range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.size);
        Some(start..end)
    }

    /// Plaintext length of chunk `index` (0 past the last chunk).
    pub fn chunk_len(&self, index: u32) -> usize {
        self.byte_range(index)
            .map(|r| (r.end - r.start) as usize)
            .unwrap_or(0)
    }
}

/// Lifecycle of one file inside a batch, as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Pending,
    Transferring,
    /// All chunks delivered; waiting on finalize / sink close
    Finalizing,
    Complete,
    Failed(String),
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Per-file transfer progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    pub name: String,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub status: FileStatus,
}

impl FileProgress {
    pub fn new(name: impl Into<String>, total_chunks: u32) -> Self {
        Self {
            name: name.into(),
            completed_chunks: 0,
            total_chunks,
            status: FileStatus::Pending,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            return if self.status == FileStatus::Complete { 1.0 } else { 0.0 };
        }
        f64::from(self.completed_chunks) / f64::from(self.total_chunks)
    }
}
