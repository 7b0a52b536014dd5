//! Receive side: manifest, ordered chunk stream per file, sink, complete.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use relaycrypt_core::config::TransferSettings;
use relaycrypt_core::path::{resolve_under, validate_relative_path};
use relaycrypt_core::{ChunkLayout, FileProgress, FileStatus, TransferError, TransferResult};
use relaycrypt_crypto::{derive_nonce, ChunkCipher, FileNonce};
use relaycrypt_relay::{DownloadRelay, RemoteFile, RemoteManifest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::assembler::ReorderingAssembler;
use crate::limiter::ConcurrencyLimiter;
use crate::probe::{EnvironmentProbe, MemoryPressureHandler, ProceedOnPressure, StaticProbe};
use crate::progress::{FileTracker, ProgressBoard};
use crate::retry::RetryPolicy;
use crate::session::TransferSession;
use crate::sink::{DiskSink, MemorySink, OutputSink, SinkOutput};
use crate::verify::VerifyingSink;

/// One file delivered by a download batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: String,
    pub index: usize,
    pub size: u64,
    pub output: SinkOutput,
}

struct PlannedFile<'m> {
    entry: &'m RemoteFile,
    layout: ChunkLayout,
    nonce: Option<FileNonce>,
}

/// Sink chain for one file: plain, or behind the digest check.
enum Pipeline {
    Direct(Box<dyn OutputSink>),
    Verified(VerifyingSink),
}

impl Pipeline {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransferResult<()> {
        match self {
            Self::Direct(sink) => sink.write_chunk(chunk).await,
            Self::Verified(sink) => sink.write_chunk(chunk).await,
        }
    }

    async fn abort(self) {
        match self {
            Self::Direct(sink) => sink.abort().await,
            Self::Verified(sink) => sink.abort().await,
        }
    }
}

pub struct DownloadOrchestrator<R> {
    relay: R,
    cipher: ChunkCipher,
    settings: TransferSettings,
    retry: RetryPolicy,
    progress: ProgressBoard,
    cancel: CancellationToken,
    probe: Arc<dyn EnvironmentProbe>,
    pressure: Arc<dyn MemoryPressureHandler>,
    output_dir: Option<PathBuf>,
}

impl<R: DownloadRelay> DownloadOrchestrator<R> {
    pub fn new(relay: R, session: &TransferSession, settings: TransferSettings) -> Self {
        Self {
            relay,
            cipher: ChunkCipher::new(session.key()),
            retry: RetryPolicy::from_settings(&settings),
            settings,
            progress: ProgressBoard::new(),
            cancel: CancellationToken::new(),
            probe: Arc::new(StaticProbe::default()),
            pressure: Arc::new(ProceedOnPressure),
            output_dir: None,
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

    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_pressure_handler(mut self, handler: Arc<dyn MemoryPressureHandler>) -> Self {
        self.pressure = handler;
        self
    }

    /// Directory large files stream into. Without one every file is
    /// buffered in memory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn progress(&self) -> &ProgressBoard {
        &self.progress
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub async fn fetch_manifest(&self) -> TransferResult<RemoteManifest> {
        self.retry
            .retry("fetch manifest", || self.relay.manifest())
            .await
    }

    /// Fetch the manifest, then download everything in it.
    pub async fn download_all(&self) -> TransferResult<Vec<DownloadedFile>> {
        let manifest = self.fetch_manifest().await?;
        self.start_download(&manifest).await
    }

    /// Download every file in `manifest`. Entries are checked (names, nonces,
    /// chunk counts) before the first chunk is requested.
    pub async fn start_download(
        &self,
        manifest: &RemoteManifest,
    ) -> TransferResult<Vec<DownloadedFile>> {
        let started = Instant::now();
        let planned = self.plan(manifest)?;

        self.progress.reset(
            planned
                .iter()
                .map(|p| FileProgress::new(&p.entry.name, p.layout.total_chunks()))
                .collect(),
        );

        // cancellation is handled per file so partial outputs get cleaned up
        match self.run_batch(&planned).await {
            Ok(files) => {
                info!(
                    files = files.len(),
                    bytes = files.iter().map(|f| f.size).sum::<u64>(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "download complete"
                );
                Ok(files)
            }
            Err(err) => {
                if err.is_cancelled() {
                    self.fail_unfinished("cancelled");
                }
                error!(files = planned.len(), "download failed: {err}");
                Err(err)
            }
        }
    }

    fn plan<'m>(&self, manifest: &'m RemoteManifest) -> TransferResult<Vec<PlannedFile<'m>>> {
        let chunk_size = match manifest.chunk_size {
            Some(size) if size != self.settings.chunk_size => {
                info!(
                    relay = size,
                    local = self.settings.chunk_size,
                    "using the relay's chunk size"
                );
                size
            }
            _ => self.settings.chunk_size,
        };

        manifest
            .files
            .iter()
            .map(|entry| -> TransferResult<PlannedFile<'m>> {
                validate_relative_path(&entry.name)?;
                let layout = ChunkLayout::new(entry.size, chunk_size)?;
                let nonce = match entry.nonce.as_deref() {
                    Some(encoded) => Some(FileNonce::from_base64(encoded)?),
                    None if layout.is_empty() => None,
                    None => {
                        return Err(TransferError::Protocol(format!(
                            "manifest entry {} ({}) has no nonce",
                            entry.index, entry.name
                        )))
                    }
                };
                Ok(PlannedFile {
                    entry,
                    layout,
                    nonce,
                })
            })
            .collect()
    }

    async fn run_batch(&self, planned: &[PlannedFile<'_>]) -> TransferResult<Vec<DownloadedFile>> {
        let files = ConcurrencyLimiter::new(self.settings.max_concurrent_files)
            .run_with_policy(
                self.settings.failure_policy,
                planned.iter().enumerate(),
                |(slot, p)| self.download_file(p, self.progress.tracker(slot)),
            )
            .await?;
        self.relay.complete_download().await?;
        Ok(files)
    }

    async fn download_file(
        &self,
        planned: &PlannedFile<'_>,
        tracker: FileTracker,
    ) -> TransferResult<DownloadedFile> {
        let name = planned.entry.name.as_str();
        let result = self.receive_file(planned, &tracker).await;
        match &result {
            Ok(_) => {
                tracker.complete();
                info!(
                    path = name,
                    file_index = planned.entry.index,
                    bytes = planned.layout.size(),
                    "file received"
                );
            }
            Err(err) => {
                tracker.fail(err);
                error!(
                    path = name,
                    file_index = planned.entry.index,
                    "file download failed: {err}"
                );
            }
        }
        result
    }

    async fn receive_file(
        &self,
        planned: &PlannedFile<'_>,
        tracker: &FileTracker,
    ) -> TransferResult<DownloadedFile> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        tracker.set_status(FileStatus::Transferring);

        let mut pipeline = self.open_pipeline(planned).await?;
        let pumped = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.pump(planned, &mut pipeline, tracker) => r,
        };
        if let Err(err) = pumped {
            pipeline.abort().await;
            return Err(err);
        }

        tracker.set_status(FileStatus::Finalizing);
        let output = match pipeline {
            Pipeline::Direct(sink) => sink.finish().await?,
            Pipeline::Verified(sink) => {
                let index = planned.entry.index;
                let label = format!("fetch digest for {}", planned.entry.name);
                let expected = match self
                    .retry
                    .retry(&label, || self.relay.file_digest(index))
                    .await
                {
                    Ok(digest) => digest,
                    Err(err) => {
                        sink.abort().await;
                        return Err(err);
                    }
                };
                sink.finish(&expected).await?
            }
        };

        Ok(DownloadedFile {
            name: planned.entry.name.clone(),
            index: planned.entry.index,
            size: planned.layout.size(),
            output,
        })
    }

    async fn open_pipeline(&self, planned: &PlannedFile<'_>) -> TransferResult<Pipeline> {
        let name = planned.entry.name.as_str();
        let size = planned.layout.size();

        let disk_dir = self
            .output_dir
            .as_deref()
            .filter(|_| self.probe.supports_incremental_write())
            .filter(|_| size > self.settings.disk_stream_threshold);

        let sink: Box<dyn OutputSink> = match disk_dir {
            Some(dir) => {
                let dest = resolve_under(dir, name)?;
                debug!(path = name, dest = %dest.display(), "streaming to disk");
                Box::new(DiskSink::create(dest).await?)
            }
            None => {
                if let Some(available) = self.probe.available_memory() {
                    let budget = available as f64 * self.settings.memory_warning_ratio;
                    if size as f64 > budget && !self.pressure.confirm(name, size, available) {
                        return Err(TransferError::Cancelled);
                    }
                }
                debug!(path = name, bytes = size, "buffering in memory");
                Box::new(MemorySink::with_capacity(size))
            }
        };

        Ok(if self.settings.verify_digest {
            Pipeline::Verified(VerifyingSink::new(sink))
        } else {
            Pipeline::Direct(sink)
        })
    }

    async fn pump(
        &self,
        planned: &PlannedFile<'_>,
        pipeline: &mut Pipeline,
        tracker: &FileTracker,
    ) -> TransferResult<()> {
        let total = planned.layout.total_chunks();
        let Some(nonce) = planned.nonce else {
            return Ok(());
        };
        let file_index = planned.entry.index;

        let mut assembler = ReorderingAssembler::new(
            total,
            self.settings.max_concurrent_chunks,
            |chunk_index| self.fetch_chunk(file_index, nonce, chunk_index),
        );

        let mut written = 0u64;
        while let Some(chunk) = assembler.next_chunk().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > planned.layout.size() {
                return Err(TransferError::Protocol(format!(
                    "{} is longer than the {} bytes its manifest entry declares",
                    planned.entry.name,
                    planned.layout.size()
                )));
            }
            pipeline.write_chunk(chunk).await?;
            tracker.chunk_done();
        }

        if written != planned.layout.size() {
            return Err(TransferError::Protocol(format!(
                "{} ended after {written} of {} bytes",
                planned.entry.name,
                planned.layout.size()
            )));
        }
        Ok(())
    }

    async fn fetch_chunk(
        &self,
        file_index: usize,
        nonce: FileNonce,
        chunk_index: u32,
    ) -> TransferResult<Bytes> {
        let label = format!("download file {file_index} chunk {chunk_index}");
        let encrypted = self
            .retry
            .retry(&label, || self.relay.download_chunk(file_index, chunk_index))
            .await?;
        let plaintext = self
            .cipher
            .decrypt(&encrypted, &derive_nonce(&nonce, chunk_index))?;
        debug!(file_index, chunk_index, bytes = plaintext.len(), "chunk received");
        Ok(Bytes::from(plaintext))
    }

    fn fail_unfinished(&self, reason: &str) {
        for (slot, file) in self.progress.snapshot().iter().enumerate() {
            if !file.status.is_terminal() {
                self.progress.tracker(slot).fail(reason);
            }
        }
    }
}

impl<R> std::fmt::Debug for DownloadOrchestrator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}
