use relaycrypt_core::TransferError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("chunk authentication failed: wrong key, corrupted data, or nonce mismatch")]
    TagMismatch,

    #[error("encrypted chunk too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("chunk encryption failed")]
    Encrypt,

    #[error("invalid {what} encoding: {reason}")]
    Encoding { what: &'static str, reason: String },

    #[error("invalid key length: {0} bytes (expected 32)")]
    KeyLength(usize),

    #[error("no session key available: {0}")]
    MissingKey(String),
}

impl From<CryptoError> for TransferError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::TagMismatch | CryptoError::TooShort { .. } => {
                TransferError::Integrity(err.to_string())
            }
            CryptoError::Encoding { .. } => TransferError::Protocol(err.to_string()),
            CryptoError::Encrypt | CryptoError::KeyLength(_) | CryptoError::MissingKey(_) => {
                TransferError::Config(err.to_string())
            }
        }
    }
}
