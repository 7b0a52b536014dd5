//! Streaming SHA-256 over plaintext, compared against the relay's file digest.

use sha2::{Digest, Sha256};

/// Running digest fed one chunk at a time; never holds the data itself.
#[derive(Clone, Default)]
pub struct ContentDigest {
    hasher: Sha256,
    bytes_seen: u64,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_seen += data.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Lowercase hex (64 chars).
    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDigest")
            .field("bytes_seen", &self.bytes_seen)
            .finish_non_exhaustive()
    }
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn digest_hex(data: &[u8]) -> String {
    let mut digest = ContentDigest::new();
    digest.update(data);
    digest.finalize_hex()
}

/// Hex digests compare case-insensitively; surrounding whitespace is ignored.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
