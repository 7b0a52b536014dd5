//! relaycrypt-relay: the relay wire protocol
//!
//! The relay is an opaque HTTP service. Uploads go to `/receive/{token}/...`,
//! downloads come from `/send/{token}/...`, and every call carries the
//! caller's `clientId` as a query parameter. Only ciphertext and per-file
//! nonces cross this boundary; the session key never does.

pub mod client;
pub mod health;
pub mod transport;
pub mod wire;

pub use client::{build_client, check_relay_url, HttpRelay};
pub use health::{check_health, is_healthy};
pub use transport::{DownloadRelay, UploadRelay};
pub use wire::{AnnouncedFile, ChunkUpload, ManifestAck, RemoteFile, RemoteManifest};
