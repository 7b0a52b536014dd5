//! Per-file progress, published to the presentation layer over a watch channel.

use std::sync::Arc;

use relaycrypt_core::{FileProgress, FileStatus};
use tokio::sync::watch;

/// Snapshot board of every file in the current batch.
///
/// Subscribers see whole-batch snapshots; a slot is only ever written by the
/// orchestrator driving that file.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    tx: Arc<watch::Sender<Vec<FileProgress>>>,
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<FileProgress>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<FileProgress> {
        self.tx.borrow().clone()
    }

    /// Replace the board with a fresh batch.
    pub(crate) fn reset(&self, files: Vec<FileProgress>) {
        self.tx.send_replace(files);
    }

    pub(crate) fn tracker(&self, slot: usize) -> FileTracker {
        FileTracker {
            board: self.clone(),
            slot,
        }
    }
}

/// Write handle for one slot of a [`ProgressBoard`].
#[derive(Debug, Clone)]
pub struct FileTracker {
    board: ProgressBoard,
    slot: usize,
}

impl FileTracker {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Count one more chunk done. Never moves backwards or past the total.
    pub fn chunk_done(&self) {
        self.board.tx.send_modify(|files| {
            if let Some(file) = files.get_mut(self.slot) {
                file.completed_chunks = (file.completed_chunks + 1).min(file.total_chunks);
            }
        });
    }

    pub fn set_status(&self, status: FileStatus) {
        self.board.tx.send_modify(|files| {
            if let Some(file) = files.get_mut(self.slot) {
                file.status = status;
            }
        });
    }

    /// Record a terminal failure, keeping whatever progress was made.
    pub fn fail(&self, reason: impl std::fmt::Display) {
        self.set_status(FileStatus::Failed(reason.to_string()));
    }

    pub fn complete(&self) {
        self.board.tx.send_modify(|files| {
            if let Some(file) = files.get_mut(self.slot) {
                file.completed_chunks = file.total_chunks;
                file.status = FileStatus::Complete;
            }
        });
    }
}
