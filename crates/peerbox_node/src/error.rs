//! Error types for node operations.

use peerbox_auth::AuthError;
use peerbox_engine::EngineError;
use peerbox_proto::ProtoError;
use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur while running a node.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether a fresh connection attempt may succeed.
        retryable: bool,
    },

    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The handshake did not complete inside its window.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Membership check or challenge exchange failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote end refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Malformed wire traffic.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// Failure in the sync protocol engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Key or group operation failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// I/O failure outside a transport.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid node configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl NodeError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a fresh attempt may succeed.
    ///
    /// Authentication and refusal outcomes will fail again as asked;
    /// transport drops and timeouts are worth a new connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Transport { retryable, .. } => *retryable,
            NodeError::ConnectionClosed => true,
            NodeError::HandshakeTimeout => true,
            NodeError::Engine(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(NodeError::transport_retryable("reset by peer").is_retryable());
        assert!(!NodeError::transport_fatal("bad address").is_retryable());
        assert!(NodeError::HandshakeTimeout.is_retryable());
        assert!(NodeError::ConnectionClosed.is_retryable());
        assert!(!NodeError::AuthenticationFailed("mismatch".into()).is_retryable());
        assert!(!NodeError::Refused("not a member".into()).is_retryable());
    }
}
