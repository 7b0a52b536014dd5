//! Transport seams the transfer orchestrators are generic over.
//!
//! [`HttpRelay`](crate::HttpRelay) is the production implementation; tests
//! substitute in-memory relays that can drop, delay, or corrupt calls.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use relaycrypt_core::TransferResult;

use crate::wire::{AnnouncedFile, ChunkUpload, ManifestAck, RemoteManifest};

/// Upload-side relay calls, all scoped to one session token.
#[async_trait]
pub trait UploadRelay: Send + Sync {
    /// Announce the batch before any chunk is sent.
    async fn announce(&self, files: &[AnnouncedFile]) -> TransferResult<ManifestAck>;

    /// Send one encrypted chunk. Re-sending the same chunk must be harmless.
    async fn upload_chunk(&self, chunk: &ChunkUpload) -> TransferResult<()>;

    /// Mark one file as fully uploaded.
    async fn finalize(&self, relative_path: &str) -> TransferResult<()>;

    /// Mark the whole batch as done.
    async fn complete_upload(&self) -> TransferResult<()>;
}

/// Download-side relay calls, all scoped to one session token.
#[async_trait]
pub trait DownloadRelay: Send + Sync {
    async fn manifest(&self) -> TransferResult<RemoteManifest>;

    /// Fetch `ciphertext || tag` for one chunk.
    async fn download_chunk(&self, file_index: usize, chunk_index: u32) -> TransferResult<Bytes>;

    /// Hex SHA-256 of the file's plaintext, as recorded by the relay.
    async fn file_digest(&self, file_index: usize) -> TransferResult<String>;

    async fn complete_download(&self) -> TransferResult<()>;
}

#[async_trait]
impl<T: UploadRelay + ?Sized> UploadRelay for Arc<T> {
    async fn announce(&self, files: &[AnnouncedFile]) -> TransferResult<ManifestAck> {
        (**self).announce(files).await
    }

    async fn upload_chunk(&self, chunk: &ChunkUpload) -> TransferResult<()> {
        (**self).upload_chunk(chunk).await
    }

    async fn finalize(&self, relative_path: &str) -> TransferResult<()> {
        (**self).finalize(relative_path).await
    }

    async fn complete_upload(&self) -> TransferResult<()> {
        (**self).complete_upload().await
    }
}

#[async_trait]
impl<T: DownloadRelay + ?Sized> DownloadRelay for Arc<T> {
    async fn manifest(&self) -> TransferResult<RemoteManifest> {
        (**self).manifest().await
    }

    async fn download_chunk(&self, file_index: usize, chunk_index: u32) -> TransferResult<Bytes> {
        (**self).download_chunk(file_index, chunk_index).await
    }

    async fn file_digest(&self, file_index: usize) -> TransferResult<String> {
        (**self).file_digest(file_index).await
    }

    async fn complete_download(&self) -> TransferResult<()> {
        (**self).complete_download().await
    }
}
