//! relaycrypt-transfer: the chunked end-to-end transfer engine
//!
//! Upload: announce the batch, send chunk 0 of each file with its fresh
//! nonce, fan out the remaining chunks through a bounded window, finalize,
//! complete. Download: fetch chunks with bounded look-ahead, decrypt, and
//! emit them strictly in order into a disk or memory sink.
//!
//! Everything runs on one task with cooperative concurrency; nothing here
//! spawns.

pub mod assembler;
pub mod download;
pub mod limiter;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod session;
pub mod sink;
pub mod source;
pub mod upload;
pub mod verify;

pub use assembler::ReorderingAssembler;
pub use download::{DownloadOrchestrator, DownloadedFile};
pub use limiter::ConcurrencyLimiter;
pub use probe::{
    EnvironmentProbe, MemoryPressureHandler, ProceedOnPressure, RefuseOnPressure, StaticProbe,
};
pub use progress::{FileTracker, ProgressBoard};
pub use retry::RetryPolicy;
pub use session::{LinkDirection, TransferLink, TransferSession};
pub use sink::{DiskSink, MemorySink, OutputSink, SinkOutput};
pub use source::{collect_files, UploadFile, UploadSource};
pub use upload::{UploadOrchestrator, UploadReport};
pub use verify::VerifyingSink;
