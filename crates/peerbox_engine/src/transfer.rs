//! Per-path transfer state.

use crate::paths::RelativePath;
use crate::store::StagingTicket;
use peerbox_proto::FileDescriptor;
use std::time::{Duration, Instant};

/// Lifecycle of one file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Proposed but not yet accepted.
    Negotiating,
    /// Staging allocated, byte ranges in flight.
    Transferring,
    /// All bytes received and the digest matched; file promoted.
    Complete,
    /// Failed response, digest mismatch, or stall; staging discarded.
    Aborted,
}

/// State of one in-flight inbound file transfer.
///
/// Ranges are requested strictly in order, tiling `[0, size)` with no
/// gaps or overlaps; bytes recorded never exceed the negotiated size.
#[derive(Debug)]
pub struct Transfer {
    path: RelativePath,
    descriptor: FileDescriptor,
    ticket: StagingTicket,
    next_offset: u64,
    status: TransferStatus,
    last_progress: Instant,
}

impl Transfer {
    /// Creates a transfer in `Negotiating` state staging under `ticket`.
    pub fn new(path: RelativePath, descriptor: FileDescriptor, ticket: StagingTicket) -> Self {
        Self {
            path,
            descriptor,
            ticket,
            next_offset: 0,
            status: TransferStatus::Negotiating,
            last_progress: Instant::now(),
        }
    }

    /// Marks the transfer accepted; staging has been allocated.
    pub fn begin(&mut self) {
        self.status = TransferStatus::Transferring;
        self.last_progress = Instant::now();
    }

    /// Path under transfer.
    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Descriptor negotiated for this transfer.
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Staging allocation this transfer writes into.
    pub fn ticket(&self) -> StagingTicket {
        self.ticket
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Offset of the next byte still to be received.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Bytes still to be received.
    pub fn remaining(&self) -> u64 {
        self.descriptor.file_size - self.next_offset
    }

    /// Next `(position, length)` range to request, or `None` when all
    /// bytes are in.
    pub fn next_range(&self, chunk_size: u64) -> Option<(u64, u64)> {
        let remaining = self.remaining();
        if remaining == 0 {
            None
        } else {
            Some((self.next_offset, chunk_size.min(remaining)))
        }
    }

    /// Records `length` received bytes at the expected offset.
    ///
    /// Returns false (and records nothing) if the chunk would overrun
    /// the negotiated size.
    pub fn record_chunk(&mut self, length: u64) -> bool {
        if length > self.remaining() {
            return false;
        }
        self.next_offset += length;
        self.last_progress = Instant::now();
        true
    }

    /// Returns true once every byte of `[0, size)` has been recorded.
    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns true if the transfer has made no progress for `timeout`.
    pub fn stalled(&self, timeout: Duration) -> bool {
        self.status == TransferStatus::Transferring && self.last_progress.elapsed() >= timeout
    }

    /// Marks the transfer complete.
    pub fn complete(&mut self) {
        self.status = TransferStatus::Complete;
    }

    /// Marks the transfer aborted.
    pub fn abort(&mut self) {
        self.status = TransferStatus::Aborted;
    }
}
