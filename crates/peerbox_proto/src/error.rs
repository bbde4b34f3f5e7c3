//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// The document did not parse as a recognized command.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A field carried an invalid value.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Encoding a message failed.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ProtoError {
    /// Creates an invalid-field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
