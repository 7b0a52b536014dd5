//! In-memory relay with failure injection, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use relaycrypt_core::config::TransferSettings;
use relaycrypt_core::{TransferError, TransferResult};
use relaycrypt_crypto::{FileNonce, SessionKey};
use relaycrypt_relay::{
    AnnouncedFile, ChunkUpload, DownloadRelay, ManifestAck, RemoteFile, RemoteManifest,
    UploadRelay,
};
use relaycrypt_transfer::{RetryPolicy, TransferSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Announce,
    UploadStart { path: String, index: u32 },
    UploadDone { path: String, index: u32 },
    Finalize(String),
    CompleteUpload,
    CompleteDownload,
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_size: u64,
    pub nonce: Option<String>,
}

#[derive(Default)]
struct State {
    announced: Vec<AnnouncedFile>,
    ack_override: Option<u64>,
    chunks: HashMap<(String, u32), Bytes>,
    uploads: Vec<UploadRecord>,
    nonces: HashMap<String, String>,
    finalized: Vec<String>,
    digests: HashMap<usize, String>,
    events: Vec<Event>,
    upload_failures: HashMap<(String, u32), u32>,
    upload_failures_after_store: HashMap<(String, u32), u32>,
    download_failures: HashMap<(usize, u32), u32>,
    corrupt: HashSet<(usize, u32)>,
    download_calls: HashMap<(usize, u32), u32>,
    download_delays_ms: Vec<u64>,
    active_downloads: usize,
    peak_downloads: usize,
    chunk_size_hint: Option<u64>,
}

/// A relay that stores ciphertext in memory. Whatever is uploaded can be
/// downloaded again under the announced file order.
#[derive(Default)]
pub struct MemoryRelay {
    state: Mutex<State>,
    upload_delay: Option<Duration>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chunk upload takes `delay` before it is acknowledged.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Chunk `i` of every file takes `delays_ms[i % len]` to download.
    pub fn with_download_delays(self, delays_ms: Vec<u64>) -> Self {
        self.state.lock().unwrap().download_delays_ms = delays_ms;
        self
    }

    pub fn with_ack_total(self, total: u64) -> Self {
        self.state.lock().unwrap().ack_override = Some(total);
        self
    }

    pub fn with_chunk_size_hint(self, chunk_size: u64) -> Self {
        self.state.lock().unwrap().chunk_size_hint = Some(chunk_size);
        self
    }

    pub fn fail_upload(&self, path: &str, index: u32, times: u32) {
        self.state
            .lock()
            .unwrap()
            .upload_failures
            .insert((path.to_string(), index), times);
    }

    /// Store the chunk, then report failure anyway (lost acknowledgment).
    pub fn fail_upload_after_store(&self, path: &str, index: u32, times: u32) {
        self.state
            .lock()
            .unwrap()
            .upload_failures_after_store
            .insert((path.to_string(), index), times);
    }

    pub fn fail_download(&self, file_index: usize, chunk_index: u32, times: u32) {
        self.state
            .lock()
            .unwrap()
            .download_failures
            .insert((file_index, chunk_index), times);
    }

    pub fn corrupt_chunk(&self, file_index: usize, chunk_index: u32) {
        self.state
            .lock()
            .unwrap()
            .corrupt
            .insert((file_index, chunk_index));
    }

    pub fn set_digest(&self, file_index: usize, digest: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .digests
            .insert(file_index, digest.into());
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn announced(&self) -> Vec<AnnouncedFile> {
        self.state.lock().unwrap().announced.clone()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.state.lock().unwrap().finalized.clone()
    }

    pub fn stored_chunks(&self) -> usize {
        self.state.lock().unwrap().chunks.len()
    }

    pub fn download_calls(&self, file_index: usize, chunk_index: u32) -> u32 {
        self.state
            .lock()
            .unwrap()
            .download_calls
            .get(&(file_index, chunk_index))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_download_calls(&self) -> u32 {
        self.state.lock().unwrap().download_calls.values().sum()
    }

    pub fn peak_downloads(&self) -> usize {
        self.state.lock().unwrap().peak_downloads
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn take_failure<K: std::hash::Hash + Eq>(map: &mut HashMap<K, u32>, key: &K) -> bool {
        match map.get_mut(key) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

fn unavailable() -> TransferError {
    TransferError::Http {
        status: 503,
        url: "memory://relay".into(),
    }
}

#[async_trait]
impl UploadRelay for MemoryRelay {
    async fn announce(&self, files: &[AnnouncedFile]) -> TransferResult<ManifestAck> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Announce);
        state.announced = files.to_vec();
        Ok(ManifestAck {
            total_chunks: state.ack_override,
        })
    }

    async fn upload_chunk(&self, chunk: &ChunkUpload) -> TransferResult<()> {
        let key = (chunk.relative_path.clone(), chunk.chunk_index);
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(Event::UploadStart {
                path: chunk.relative_path.clone(),
                index: chunk.chunk_index,
            });
            state.uploads.push(UploadRecord {
                path: chunk.relative_path.clone(),
                index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                file_size: chunk.file_size,
                nonce: chunk.nonce.clone(),
            });
            if Self::take_failure(&mut state.upload_failures, &key) {
                return Err(unavailable());
            }
        }

        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.chunks.insert(key.clone(), chunk.payload.clone());
        if let Some(nonce) = &chunk.nonce {
            state.nonces.insert(chunk.relative_path.clone(), nonce.clone());
        }
        if Self::take_failure(&mut state.upload_failures_after_store, &key) {
            return Err(unavailable());
        }
        state.events.push(Event::UploadDone {
            path: chunk.relative_path.clone(),
            index: chunk.chunk_index,
        });
        Ok(())
    }

    async fn finalize(&self, relative_path: &str) -> TransferResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Finalize(relative_path.to_string()));
        state.finalized.push(relative_path.to_string());
        Ok(())
    }

    async fn complete_upload(&self) -> TransferResult<()> {
        self.state.lock().unwrap().events.push(Event::CompleteUpload);
        Ok(())
    }
}

#[async_trait]
impl DownloadRelay for MemoryRelay {
    async fn manifest(&self) -> TransferResult<RemoteManifest> {
        let state = self.state.lock().unwrap();
        let files = state
            .announced
            .iter()
            .enumerate()
            .map(|(index, file)| RemoteFile {
                name: file.relative_path.clone(),
                size: file.size,
                index,
                // the relay re-encodes the uploaded nonce for the download side
                nonce: state.nonces.get(&file.relative_path).map(|n| {
                    FileNonce::from_base64(n)
                        .expect("stored nonce decodes")
                        .to_base64url()
                }),
            })
            .collect();
        Ok(RemoteManifest {
            files,
            chunk_size: state.chunk_size_hint,
        })
    }

    async fn download_chunk(&self, file_index: usize, chunk_index: u32) -> TransferResult<Bytes> {
        let key = (file_index, chunk_index);
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.download_calls.entry(key).or_insert(0) += 1;
            if Self::take_failure(&mut state.download_failures, &key) {
                return Err(unavailable());
            }
            state.active_downloads += 1;
            state.peak_downloads = state.peak_downloads.max(state.active_downloads);
            let delays = &state.download_delays_ms;
            if delays.is_empty() {
                0
            } else {
                delays[chunk_index as usize % delays.len()]
            }
        };

        tokio::time::sleep(Duration::from_millis(delay)).await;

        let mut state = self.state.lock().unwrap();
        state.active_downloads -= 1;
        let path = state
            .announced
            .get(file_index)
            .map(|f| f.relative_path.clone())
            .ok_or_else(|| TransferError::Http {
                status: 404,
                url: format!("memory://relay/{file_index}"),
            })?;
        let stored = state
            .chunks
            .get(&(path, chunk_index))
            .cloned()
            .ok_or_else(|| TransferError::Http {
                status: 404,
                url: format!("memory://relay/{file_index}/chunk/{chunk_index}"),
            })?;
        if state.corrupt.contains(&key) {
            let mut bytes = stored.to_vec();
            bytes[0] ^= 0xFF;
            return Ok(Bytes::from(bytes));
        }
        Ok(stored)
    }

    async fn file_digest(&self, file_index: usize) -> TransferResult<String> {
        self.state
            .lock()
            .unwrap()
            .digests
            .get(&file_index)
            .cloned()
            .ok_or_else(|| TransferError::Http {
                status: 404,
                url: format!("memory://relay/{file_index}/hash"),
            })
    }

    async fn complete_download(&self) -> TransferResult<()> {
        self.state.lock().unwrap().events.push(Event::CompleteDownload);
        Ok(())
    }
}

pub fn session() -> TransferSession {
    TransferSession::new("test-token", SessionKey::from_bytes([7u8; 32]))
}

/// Small chunks so tests stay fast; everything else at defaults.
pub fn settings(chunk_size: u64) -> TransferSettings {
    TransferSettings {
        chunk_size,
        ..TransferSettings::default()
    }
}

/// Fast, deterministic backoff for paused-clock tests.
pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_delays(Duration::from_millis(10), Duration::from_millis(100))
        .with_jitter(false)
}

pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    (0..len as u64)
        .map(|i| ((i.wrapping_mul(31).wrapping_add(seed)) ^ (i >> 5)) as u8)
        .collect()
}
