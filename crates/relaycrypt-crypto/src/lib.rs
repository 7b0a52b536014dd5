//! relaycrypt-crypto: end-to-end chunk encryption for relayed transfers
//!
//! The relay only ever sees ciphertext. Every file gets a fresh random
//! 8-byte nonce prefix; each chunk's 96-bit AES-GCM nonce is that prefix
//! followed by the chunk index as a 4-byte big-endian counter:
//!
//! ```text
//! chunk nonce = file_nonce (8 bytes) || chunk_index (u32, big-endian)
//! encrypted chunk = ciphertext || 16-byte GCM tag
//! ```
//!
//! The session key never leaves the client; it arrives out of band through a
//! [`CredentialProvider`] (typically a link fragment).

pub mod chunk;
pub mod digest;
mod encoding;
pub mod error;
pub mod keys;
pub mod nonce;

pub use chunk::{decrypt_chunk, encrypt_chunk, ChunkCipher};
pub use digest::{digest_hex, digests_match, ContentDigest};
pub use error::CryptoError;
pub use keys::{
    CredentialProvider, EnvCredentials, FragmentCredentials, SessionKey, StaticCredentials,
};
pub use nonce::{derive_nonce, ChunkNonce, FileNonce};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// Random per-file nonce prefix
pub const FILE_NONCE_SIZE: usize = 8;

/// Full AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag appended to every chunk
pub const TAG_SIZE: usize = 16;
