//! Terminal progress bars fed from a transfer's progress board.

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use relaycrypt_core::{FileProgress, FileStatus};
use relaycrypt_transfer::ProgressBoard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One bar per file, redrawn whenever the board publishes a snapshot.
pub struct ProgressView {
    done: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressView {
    /// Subscribe to `board`. Must be called before the batch starts so the
    /// first snapshot is not missed.
    pub fn spawn(board: &ProgressBoard, prefix: &'static str) -> Result<Self> {
        let style =
            ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-");
        let mut rx = board.subscribe();
        let done = CancellationToken::new();
        let stop = done.clone();

        let task = tokio::spawn(async move {
            let mut bars = Bars::new(style, prefix);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        bars.render(&snapshot);
                    }
                    _ = stop.cancelled() => break,
                }
            }
            let last = rx.borrow().clone();
            bars.render(&last);
            bars.finish();
        });

        Ok(Self { done, task })
    }

    /// Draw the final state and stop redrawing.
    pub async fn finish(self) {
        self.done.cancel();
        let _ = self.task.await;
    }
}

struct Bars {
    multi: MultiProgress,
    style: ProgressStyle,
    prefix: &'static str,
    bars: Vec<ProgressBar>,
}

impl Bars {
    fn new(style: ProgressStyle, prefix: &'static str) -> Self {
        Self {
            multi: MultiProgress::new(),
            style,
            prefix,
            bars: Vec::new(),
        }
    }

    fn render(&mut self, files: &[FileProgress]) {
        // a shorter snapshot means the board was reset for a new batch
        if files.len() < self.bars.len() {
            for bar in self.bars.drain(..) {
                bar.finish_and_clear();
            }
        }
        while self.bars.len() < files.len() {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(self.style.clone());
            bar.set_prefix(self.prefix);
            self.bars.push(bar);
        }
        for (bar, file) in self.bars.iter().zip(files) {
            bar.set_length(u64::from(file.total_chunks));
            bar.set_position(u64::from(file.completed_chunks));
            bar.set_message(status_message(file));
        }
    }

    fn finish(&self) {
        for bar in &self.bars {
            if !bar.is_finished() {
                bar.finish();
            }
        }
    }
}

fn status_message(file: &FileProgress) -> String {
    match &file.status {
        FileStatus::Pending => format!("{} (waiting)", file.name),
        FileStatus::Transferring => file.name.clone(),
        FileStatus::Finalizing => format!("{} (finalizing)", file.name),
        FileStatus::Complete => format!("{} done", file.name),
        FileStatus::Failed(reason) => format!("{} failed: {reason}", file.name),
    }
}
