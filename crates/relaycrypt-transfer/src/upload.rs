//! Send side: manifest, chunk 0, remaining chunks, finalize, complete.

use std::time::Instant;

use bytes::Bytes;
use relaycrypt_core::config::TransferSettings;
use relaycrypt_core::path::{file_name, validate_relative_path};
use relaycrypt_core::{ChunkLayout, FileProgress, FileStatus, TransferError, TransferResult};
use relaycrypt_crypto::{derive_nonce, ChunkCipher, FileNonce};
use relaycrypt_relay::{AnnouncedFile, ChunkUpload, UploadRelay};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::limiter::ConcurrencyLimiter;
use crate::progress::{FileTracker, ProgressBoard};
use crate::retry::RetryPolicy;
use crate::session::TransferSession;
use crate::source::UploadFile;

/// Summary of a finished upload batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub files: usize,
    pub chunks: u64,
    pub bytes: u64,
}

struct PlannedFile<'f> {
    file: &'f UploadFile,
    layout: ChunkLayout,
}

pub struct UploadOrchestrator<R> {
    relay: R,
    cipher: ChunkCipher,
    settings: TransferSettings,
    retry: RetryPolicy,
    progress: ProgressBoard,
    cancel: CancellationToken,
}

impl<R: UploadRelay> UploadOrchestrator<R> {
    pub fn new(relay: R, session: &TransferSession, settings: TransferSettings) -> Self {
        Self {
            relay,
            cipher: ChunkCipher::new(session.key()),
            retry: RetryPolicy::from_settings(&settings),
            settings,
            progress: ProgressBoard::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBoard) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> &ProgressBoard {
        &self.progress
    }

    /// Token that aborts the batch when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Upload a batch. Nothing is sent until every file has been sized and
    /// its path checked.
    pub async fn start_upload(&self, files: &[UploadFile]) -> TransferResult<UploadReport> {
        let started = Instant::now();
        let planned = self.plan(files).await?;

        self.progress.reset(
            planned
                .iter()
                .map(|p| FileProgress::new(p.file.relative_path(), p.layout.total_chunks()))
                .collect(),
        );

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.run_batch(&planned) => r,
        };

        if let Err(err) = result {
            if err.is_cancelled() {
                self.fail_unfinished("cancelled");
            }
            error!(files = planned.len(), "upload failed: {err}");
            return Err(err);
        }

        let report = UploadReport {
            files: planned.len(),
            chunks: planned.iter().map(|p| u64::from(p.layout.total_chunks())).sum(),
            bytes: planned.iter().map(|p| p.layout.size()).sum(),
        };
        info!(
            files = report.files,
            chunks = report.chunks,
            bytes = report.bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload complete"
        );
        Ok(report)
    }

    async fn plan<'f>(&self, files: &'f [UploadFile]) -> TransferResult<Vec<PlannedFile<'f>>> {
        let mut planned = Vec::with_capacity(files.len());
        for file in files {
            validate_relative_path(file.relative_path())?;
            let layout = ChunkLayout::new(file.size().await?, self.settings.chunk_size)?;
            planned.push(PlannedFile { file, layout });
        }
        Ok(planned)
    }

    async fn run_batch(&self, planned: &[PlannedFile<'_>]) -> TransferResult<()> {
        let announced: Vec<AnnouncedFile> = planned
            .iter()
            .map(|p| AnnouncedFile {
                relative_path: p.file.relative_path().to_string(),
                size: p.layout.size(),
            })
            .collect();
        let ack = self.relay.announce(&announced).await?;

        let expected: u64 = planned
            .iter()
            .map(|p| u64::from(p.layout.total_chunks()))
            .sum();
        if let Some(total) = ack.total_chunks {
            if total != expected {
                return Err(TransferError::Protocol(format!(
                    "relay expects {total} chunks but this batch has {expected}; \
                     chunk sizes disagree"
                )));
            }
        }
        info!(files = planned.len(), chunks = expected, "manifest acknowledged");

        ConcurrencyLimiter::new(self.settings.max_concurrent_files)
            .run_with_policy(
                self.settings.failure_policy,
                planned.iter().enumerate(),
                |(slot, p)| self.upload_file(p, self.progress.tracker(slot)),
            )
            .await?;

        self.relay.complete_upload().await
    }

    async fn upload_file(
        &self,
        planned: &PlannedFile<'_>,
        tracker: FileTracker,
    ) -> TransferResult<()> {
        let path = planned.file.relative_path();
        let result = self.send_file(planned, &tracker).await;
        match &result {
            Ok(()) => {
                tracker.complete();
                info!(path, bytes = planned.layout.size(), "file uploaded");
            }
            Err(err) => {
                tracker.fail(err);
                error!(path, "file upload failed: {err}");
            }
        }
        result
    }

    async fn send_file(
        &self,
        planned: &PlannedFile<'_>,
        tracker: &FileTracker,
    ) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        tracker.set_status(FileStatus::Transferring);
        let layout = &planned.layout;

        if !layout.is_empty() {
            let nonce = FileNonce::generate();

            // chunk 0 carries the nonce and must land before anything else
            self.send_chunk(planned, &nonce, 0).await?;
            tracker.chunk_done();

            ConcurrencyLimiter::new(self.settings.max_concurrent_chunks)
                .run(1..layout.total_chunks(), |index| async move {
                    self.send_chunk(planned, &nonce, index).await?;
                    tracker.chunk_done();
                    Ok::<_, TransferError>(())
                })
                .await?;
        }

        tracker.set_status(FileStatus::Finalizing);
        self.relay.finalize(planned.file.relative_path()).await
    }

    async fn send_chunk(
        &self,
        planned: &PlannedFile<'_>,
        nonce: &FileNonce,
        index: u32,
    ) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let path = planned.file.relative_path();
        let layout = &planned.layout;
        let range = layout.byte_range(index).ok_or_else(|| {
            TransferError::Protocol(format!("chunk {index} is past the end of {path}"))
        })?;

        let plaintext = planned.file.read_range(range).await?;
        let payload = self.cipher.encrypt(&plaintext, &derive_nonce(nonce, index))?;
        let chunk = ChunkUpload {
            relative_path: path.to_string(),
            file_name: file_name(path).to_string(),
            chunk_index: index,
            total_chunks: layout.total_chunks(),
            file_size: layout.size(),
            nonce: (index == 0).then(|| nonce.to_base64()),
            payload: Bytes::from(payload),
        };

        let label = format!("upload {path} chunk {index}");
        self.retry
            .retry(&label, || self.relay.upload_chunk(&chunk))
            .await?;
        debug!(path, chunk_index = index, bytes = plaintext.len(), "chunk sent");
        Ok(())
    }

    fn fail_unfinished(&self, reason: &str) {
        for (slot, file) in self.progress.snapshot().iter().enumerate() {
            if !file.status.is_terminal() {
                self.progress.tracker(slot).fail(reason);
            }
        }
    }
}

impl<R> std::fmt::Debug for UploadOrchestrator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
