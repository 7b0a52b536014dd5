//! relaycrypt-core: shared types, configuration schema, and error taxonomy
//!
//! Everything here is runtime-agnostic: no I/O beyond config parsing, no
//! async. The crypto, relay, and transfer crates build on these types.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use error::{ErrorKind, TransferError, TransferResult};
pub use types::{ChunkLayout, FileProgress, FileStatus};
