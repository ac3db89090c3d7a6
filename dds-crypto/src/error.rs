//! Container encryption error types.

use thiserror::Error;

/// Result type for container operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while producing or consuming a container.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The container header is malformed (short read, bad magic, bad version).
    #[error("malformed container: {0}")]
    Format(String),

    /// A header packet or data block failed tag verification.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("no header packet could be opened with the supplied keys")]
    NoMatchingPacket,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
