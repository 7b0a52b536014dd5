//! Session keys and the out-of-band channels that deliver them.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::encoding;
use crate::error::CryptoError;
use crate::KEY_SIZE;

/// The symmetric key shared by sender and receiver. Zeroized on drop and
/// never serialized to the relay.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Parse a base64 key (either alphabet, padding optional).
    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        let mut decoded = encoding::decode_any(input).map_err(|e| CryptoError::Encoding {
            what: "session key",
            reason: e.to_string(),
        })?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::KeyLength(len));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// URL-safe base64, suitable for a link fragment.
    pub fn to_base64url(&self) -> String {
        encoding::encode_url_safe(&self.bytes)
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Yields the session key from some channel the relay never sees.
pub trait CredentialProvider: Send + Sync {
    fn session_key(&self) -> Result<SessionKey, CryptoError>;
}

/// Key carried in a link fragment: `#key=<base64url>` or a bare `#<base64url>`.
///
/// Fragments are not sent in HTTP requests, which is what keeps the key away
/// from the relay.
#[derive(Clone)]
pub struct FragmentCredentials {
    fragment: String,
}

impl FragmentCredentials {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
        }
    }
}

impl CredentialProvider for FragmentCredentials {
    fn session_key(&self) -> Result<SessionKey, CryptoError> {
        let fragment = self.fragment.trim_start_matches('#');
        if fragment.is_empty() {
            return Err(CryptoError::MissingKey("link has no fragment".into()));
        }
        let value = fragment
            .split('&')
            .find_map(|pair| pair.strip_prefix("key="))
            .unwrap_or(fragment);
        SessionKey::from_base64(value)
    }
}

impl std::fmt::Debug for FragmentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentCredentials")
            .field("fragment", &"[REDACTED]")
            .finish()
    }
}

/// A key handed over directly by the embedding application.
#[derive(Debug, Clone)]
pub struct StaticCredentials(SessionKey);

impl StaticCredentials {
    pub fn new(key: SessionKey) -> Self {
        Self(key)
    }
}

impl CredentialProvider for StaticCredentials {
    fn session_key(&self) -> Result<SessionKey, CryptoError> {
        Ok(self.0.clone())
    }
}

/// Base64 key read from an environment variable (default `RELAYCRYPT_KEY`).
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub const DEFAULT_VAR: &'static str = "RELAYCRYPT_KEY";

    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialProvider for EnvCredentials {
    fn session_key(&self) -> Result<SessionKey, CryptoError> {
        let value = std::env::var(&self.var)
            .map_err(|_| CryptoError::MissingKey(format!("{} is not set", self.var)))?;
        SessionKey::from_base64(&value)
    }
}
