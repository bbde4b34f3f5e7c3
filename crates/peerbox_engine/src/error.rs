//! Error types for the sync engine.

use peerbox_proto::ProtoError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running the sync protocol.
///
/// Expected refusals (unsafe path, already-exists, stale descriptor) are
/// not errors; they travel as `status:false` responses. These variants
/// cover failures the protocol cannot answer in-band.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Disk I/O failure while staging, promoting, or reading content.
    #[error("storage error on {path}: {source}")]
    Store {
        /// Sync-relative path the operation was for.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Assembled content does not hash to the negotiated digest.
    #[error("integrity failure on {path}: expected digest {expected}, assembled {actual}")]
    Integrity {
        /// Sync-relative path of the aborted transfer.
        path: String,
        /// Digest negotiated at create/modify time.
        expected: String,
        /// Digest of the bytes actually assembled.
        actual: String,
    },

    /// Malformed wire payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// A transfer was driven out of its legal state sequence.
    #[error("invalid transfer state for {path}: {reason}")]
    TransferState {
        /// Sync-relative path of the transfer.
        path: String,
        /// What was attempted.
        reason: String,
    },
}

impl EngineError {
    /// Creates a storage error with path context.
    pub fn store(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Returns true if retrying the surrounding operation may succeed.
    ///
    /// Integrity and protocol failures will never succeed as asked;
    /// storage failures may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store { .. })
    }
}
