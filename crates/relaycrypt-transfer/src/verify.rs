//! Pass-through content digest between decryption and the output sink.

use bytes::Bytes;
use relaycrypt_core::{TransferError, TransferResult};
use relaycrypt_crypto::{digests_match, ContentDigest};
use tracing::debug;

use crate::sink::{OutputSink, SinkOutput};

/// Forwards every chunk to the wrapped sink as soon as it arrives and folds
/// it into a running SHA-256. Holds no file data of its own.
pub struct VerifyingSink {
    inner: Box<dyn OutputSink>,
    digest: ContentDigest,
}

impl VerifyingSink {
    pub fn new(inner: Box<dyn OutputSink>) -> Self {
        Self {
            inner,
            digest: ContentDigest::new(),
        }
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> TransferResult<()> {
        self.digest.update(&chunk);
        self.inner.write_chunk(chunk).await
    }

    pub fn bytes_seen(&self) -> u64 {
        self.digest.bytes_seen()
    }

    /// Compare against the relay's digest; on mismatch the wrapped sink is
    /// aborted and nothing is published.
    pub async fn finish(self, expected: &str) -> TransferResult<SinkOutput> {
        let actual = self.digest.finalize_hex();
        if !digests_match(expected, &actual) {
            self.inner.abort().await;
            return Err(TransferError::Integrity(format!(
                "content digest mismatch: relay has {}, received data hashes to {actual}",
                expected.trim()
            )));
        }
        debug!(digest = %actual, "content digest verified");
        self.inner.finish().await
    }

    pub async fn abort(self) {
        self.inner.abort().await;
    }
}

impl std::fmt::Debug for VerifyingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyingSink")
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}
