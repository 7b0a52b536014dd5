//! Output sinks for decrypted, in-order plaintext.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use relaycrypt_core::TransferResult;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// What a finished sink produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutput {
    File(PathBuf),
    Memory(Bytes),
}

/// Receives plaintext chunks strictly in order.
///
/// Nothing a sink writes is visible as a finished artifact until `finish`;
/// `abort` discards whatever was written.
#[async_trait]
pub trait OutputSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransferResult<()>;

    async fn finish(self: Box<Self>) -> TransferResult<SinkOutput>;

    async fn abort(self: Box<Self>);
}

/// Streams to `<dest>.part`, then flushes, fsyncs and renames into place.
#[derive(Debug)]
pub struct DiskSink {
    dest: PathBuf,
    part: PathBuf,
    writer: BufWriter<tokio::fs::File>,
    written: u64,
}

impl DiskSink {
    pub async fn create(dest: impl Into<PathBuf>) -> TransferResult<Self> {
        let dest = dest.into();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(&dest);
        let file = tokio::fs::File::create(&part).await?;
        Ok(Self {
            dest,
            part,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn part_path(&self) -> &Path {
        &self.part
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl OutputSink for DiskSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransferResult<()> {
        self.writer.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> TransferResult<SinkOutput> {
        if let Err(err) = self.publish().await {
            self.abort().await;
            return Err(err);
        }
        debug!(path = %self.dest.display(), bytes = self.written, "file written");
        Ok(SinkOutput::File(self.dest))
    }

    async fn abort(self: Box<Self>) {
        let DiskSink { part, writer, .. } = *self;
        drop(writer);
        if let Err(e) = tokio::fs::remove_file(&part).await {
            debug!(path = %part.display(), "could not remove partial file: {e}");
        }
    }
}

impl DiskSink {
    async fn publish(&mut self) -> TransferResult<()> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        tokio::fs::rename(&self.part, &self.dest).await?;
        Ok(())
    }
}

/// Accumulates the whole file in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: BytesMut,
}

/// Upper bound on the up-front reservation; the buffer still grows past it.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

impl MemorySink {
    pub fn with_capacity(expected: u64) -> Self {
        Self {
            buf: BytesMut::with_capacity(expected.min(MAX_PREALLOC) as usize),
        }
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransferResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> TransferResult<SinkOutput> {
        Ok(SinkOutput::Memory(self.buf.freeze()))
    }

    async fn abort(self: Box<Self>) {}
}
