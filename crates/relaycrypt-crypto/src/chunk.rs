//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The nonce is not stored with the chunk. Both sides derive it from the
//! file nonce and the chunk index, so a chunk decrypted at the wrong index
//! fails authentication.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};

use crate::error::CryptoError;
use crate::keys::SessionKey;
use crate::nonce::ChunkNonce;
use crate::TAG_SIZE;

/// AES-256-GCM keyed once per session and shared by every chunk task.
#[derive(Clone)]
pub struct ChunkCipher {
    cipher: Aes256Gcm,
}

impl ChunkCipher {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Returns `ciphertext || tag` (plaintext length + 16 bytes).
    pub fn encrypt(&self, plaintext: &[u8], nonce: &ChunkNonce) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| CryptoError::Encrypt)
    }

    /// Authenticate and decrypt `ciphertext || tag`.
    ///
    /// A tag mismatch is final: it means a wrong key, corrupted bytes, or a
    /// nonce that does not belong to this chunk.
    pub fn decrypt(&self, encrypted: &[u8], nonce: &ChunkNonce) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() < TAG_SIZE {
            return Err(CryptoError::TooShort {
                len: encrypted.len(),
                min: TAG_SIZE,
            });
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce.as_bytes()), encrypted)
            .map_err(|_| CryptoError::TagMismatch)
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher").finish_non_exhaustive()
    }
}

/// Encrypt a single chunk under `key` and `nonce`.
pub fn encrypt_chunk(
    key: &SessionKey,
    nonce: &ChunkNonce,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChunkCipher::new(key).encrypt(plaintext, nonce)
}

/// Decrypt a single chunk under `key` and `nonce`.
pub fn decrypt_chunk(
    key: &SessionKey,
    nonce: &ChunkNonce,
    encrypted: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChunkCipher::new(key).decrypt(encrypted, nonce)
}
