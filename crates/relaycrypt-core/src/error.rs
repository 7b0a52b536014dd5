use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Coarse classification used by retry and failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failure or non-2xx relay response; safe to retry verbatim.
    Transient,
    /// Authentication tag or content digest mismatch.
    Integrity,
    /// Relay response had an unexpected shape, or the two sides disagree.
    Protocol,
    /// Caller-initiated abort.
    Cancelled,
    /// Local misconfiguration or I/O failure.
    Local,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),

    #[error("relay returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("{label}: giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Http { .. } => ErrorKind::Transient,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RetriesExhausted { source, .. } => source.kind(),
            Self::Config(_) | Self::InvalidPath { .. } | Self::Io(_) => ErrorKind::Local,
        }
    }

    /// Only transient errors are retried. An exhausted retry is final even
    /// though its source was transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(TransferError::Network("reset".into()).is_retryable());
        assert!(TransferError::Http {
            status: 503,
            url: "https://relay/x".into()
        }
        .is_retryable());
        assert!(!TransferError::Integrity("tag".into()).is_retryable());
        assert!(!TransferError::Protocol("shape".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
    }

    #[test]
    fn exhausted_retry_keeps_source_kind_but_is_final() {
        let err = TransferError::RetriesExhausted {
            label: "chunk 3 of a.txt".into(),
            attempts: 3,
            source: Box::new(TransferError::Http {
                status: 502,
                url: "https://relay/chunk".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("chunk 3 of a.txt"), "label missing: {msg}");
        assert!(msg.contains("3 attempts"), "attempt count missing: {msg}");
    }
}
