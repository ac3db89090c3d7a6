//! Delivery error types.

use dds_crypto::CryptoError;
use thiserror::Error;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while delivering files.
///
/// `Validation`, `Access` and `Config` abort the whole invocation. All other
/// variants are per-file: they end up on the affected record and only
/// spread to siblings through the break-on-fail cascade.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("access denied: {0}")]
    Access(String),

    /// The object store and the metadata store disagree about a key.
    #[error("{0}")]
    Consistency(String),

    /// Target already registered or delivered and overwrite is off.
    #[error("{0}")]
    Exists(String),

    #[error("malformed container: {0}")]
    Format(String),

    #[error("decryption failed: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage operation failed: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("delivery interrupted")]
    Interrupted,
}

impl DeliveryError {
    /// True for errors that must abort the whole invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeliveryError::Validation(_) | DeliveryError::Access(_) | DeliveryError::Config(_)
        )
    }
}

impl From<CryptoError> for DeliveryError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Format(msg) => DeliveryError::Format(msg),
            CryptoError::Io(e) => DeliveryError::Io(e),
            other => DeliveryError::Crypto(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Store(format!("metadata request failed: {err}"))
    }
}
