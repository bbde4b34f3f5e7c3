//! Configuration for the sync engine.

use peerbox_proto::MAX_CHUNK_SIZE;
use std::time::Duration;

/// Default byte-range request size.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Configuration for transfer negotiation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes requested per `FILE_BYTES_REQUEST`. Never exceeds
    /// [`MAX_CHUNK_SIZE`].
    pub chunk_size: u64,
    /// A transfer with no progress for this long is aborted and its
    /// staged content discarded.
    pub stall_timeout: Duration,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stall_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the chunk size, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Sets the transfer stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
