//! Common error types for plexaccess.

use thiserror::Error;

/// Top-level error type for plexaccess operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested key is absent from the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Encrypting a credential failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decrypting a credential failed (wrong key, tampered or malformed data).
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Encoding an entity failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes do not match the expected entity structure.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Input rejected before any I/O took place.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedded storage engine failed.
    #[error("Engine error: {0}")]
    Engine(String),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error only signals an absent key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
