//! Request and response bodies exchanged with the relay.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One file in the upload-side manifest announcement. The nonce is not part
/// of it: each file's nonce rides on its chunk 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedFile {
    pub relative_path: String,
    pub size: u64,
}

/// Relay reply to the manifest announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestAck {
    /// Total chunks the relay expects for the whole batch, when it says so
    #[serde(alias = "total_chunks")]
    pub total_chunks: Option<u64>,
}

/// One encrypted chunk on its way to the relay.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub relative_path: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_size: u64,
    /// Base64 file nonce; only set for chunk 0
    pub nonce: Option<String>,
    /// `ciphertext || tag`
    pub payload: Bytes,
}

/// One file as listed by the download-side manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub index: usize,
    /// Base64url file nonce; may be absent for zero-byte files
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Download-side manifest plus the relay's chunk size, if it advertises one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteManifest {
    pub files: Vec<RemoteFile>,
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteConfig {
    #[serde(default, alias = "chunk_size")]
    chunk_size: Option<u64>,
}

/// The relay may answer with a bare list or with `{ "files": [...], "config": {...} }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ManifestBody {
    List(Vec<RemoteFile>),
    Wrapped {
        files: Vec<RemoteFile>,
        #[serde(default)]
        config: Option<RemoteConfig>,
    },
}

impl From<ManifestBody> for RemoteManifest {
    fn from(body: ManifestBody) -> Self {
        match body {
            ManifestBody::List(files) => Self {
                files,
                chunk_size: None,
            },
            ManifestBody::Wrapped { files, config } => Self {
                files,
                chunk_size: config.and_then(|c| c.chunk_size),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DigestBody {
    #[serde(alias = "hash", alias = "sha256")]
    pub digest: String,
}
