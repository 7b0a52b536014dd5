//! Per-file nonce prefixes and per-chunk nonce derivation.

use rand::{rngs::OsRng, RngCore};

use crate::encoding;
use crate::error::CryptoError;
use crate::{FILE_NONCE_SIZE, NONCE_SIZE};

/// Random 8-byte nonce prefix, drawn independently for every file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileNonce([u8; FILE_NONCE_SIZE]);

impl FileNonce {
    /// Draw a fresh prefix from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; FILE_NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; FILE_NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_NONCE_SIZE] {
        &self.0
    }

    /// Standard-alphabet base64, as sent in the chunk-0 upload.
    pub fn to_base64(&self) -> String {
        encoding::encode_standard(&self.0)
    }

    /// URL-safe base64, as listed in download manifests.
    pub fn to_base64url(&self) -> String {
        encoding::encode_url_safe(&self.0)
    }

    /// Parse either base64 alphabet; the decoded value must be exactly 8 bytes.
    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode_any(input).map_err(|e| CryptoError::Encoding {
            what: "file nonce",
            reason: e.to_string(),
        })?;
        let array: [u8; FILE_NONCE_SIZE] =
            bytes.as_slice().try_into().map_err(|_| CryptoError::Encoding {
                what: "file nonce",
                reason: format!("expected {FILE_NONCE_SIZE} bytes, got {}", bytes.len()),
            })?;
        Ok(Self(array))
    }
}

impl std::fmt::Debug for FileNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileNonce({})", self.to_base64url())
    }
}

/// Full 96-bit AES-GCM nonce for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkNonce([u8; NONCE_SIZE]);

impl ChunkNonce {
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// `file_nonce || chunk_index` (big-endian).
///
/// The counter occupies bytes 8..12 and the prefix bytes 0..8, so distinct
/// indices under one prefix never collide.
pub fn derive_nonce(file_nonce: &FileNonce, chunk_index: u32) -> ChunkNonce {
    let mut out = [0u8; NONCE_SIZE];
    out[..FILE_NONCE_SIZE].copy_from_slice(file_nonce.as_bytes());
    out[FILE_NONCE_SIZE..].copy_from_slice(&chunk_index.to_be_bytes());
    ChunkNonce(out)
}
