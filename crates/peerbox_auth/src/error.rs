//! Error types for authentication and group management.

use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur in key handling, challenges, and group storage.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Key material could not be loaded or parsed.
    #[error("key storage error: {0}")]
    KeyStorage(String),

    /// Persisted group definitions are structurally invalid.
    #[error("group storage error: {0}")]
    GroupStorage(String),

    /// A group with this name already exists.
    #[error("group already exists: {0}")]
    DuplicateGroup(String),

    /// No group with this name is registered.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = AuthError::UnknownGroup("g1".into());
        assert_eq!(err.to_string(), "unknown group: g1");

        let err = AuthError::Crypto("decryption failed".into());
        assert!(err.to_string().contains("decryption failed"));
    }
}
