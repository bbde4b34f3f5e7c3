//! End-to-end synchronization harness.

use crate::fixtures::{connect, descriptor_for, node_pair, wait_until, TestNode};
use peerbox_engine::{RelativePath, SyncEvent, SyncEventKind};
use peerbox_proto::FileDescriptor;
use std::time::Duration;

/// Two authenticated nodes sharing a group, wired over an in-memory
/// transport.
///
/// Events enqueued on node A propagate to node B through the full
/// stack: dispatcher, wire protocol, transfer machine, and store.
pub struct SyncHarness {
    /// The proposing node.
    pub a: TestNode,
    /// The receiving node.
    pub b: TestNode,
}

impl SyncHarness {
    /// Builds and connects a pair with the default chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(peerbox_engine::DEFAULT_CHUNK_SIZE)
    }

    /// Builds and connects a pair with a custom chunk size, so small
    /// files still exercise the multi-chunk transfer path.
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        let (a, b) = node_pair(chunk_size);
        connect(&a, &b);
        Self { a, b }
    }

    /// Writes `content` on node A and announces its creation.
    pub fn create_on_a(&self, path: &str, content: &[u8]) -> FileDescriptor {
        let descriptor = self.a.write_file(path, content);
        self.enqueue_on_a(SyncEventKind::Create, path, descriptor.clone());
        descriptor
    }

    /// Rewrites `content` on node A and announces the modification.
    pub fn modify_on_a(&self, path: &str, content: &[u8]) -> FileDescriptor {
        let descriptor = self.a.write_file(path, content);
        self.enqueue_on_a(SyncEventKind::Modify, path, descriptor.clone());
        descriptor
    }

    /// Removes the file on node A and announces the deletion.
    ///
    /// `descriptor` must describe the version the peer holds.
    pub fn delete_on_a(&self, path: &str, descriptor: FileDescriptor) {
        self.a.remove_file(path);
        self.enqueue_on_a(SyncEventKind::Delete, path, descriptor);
    }

    /// Blocks until node B holds `path` with exactly `content`.
    pub fn wait_for_file_on_b(&self, path: &str, content: &[u8]) {
        let synced = wait_until(Duration::from_secs(5), || {
            self.b.read_file(path).as_deref() == Some(content)
        });
        assert!(synced, "{path} never reached node B with expected content");
    }

    /// Blocks until node B no longer holds `path`.
    pub fn wait_for_absence_on_b(&self, path: &str) {
        let gone = wait_until(Duration::from_secs(5), || self.b.read_file(path).is_none());
        assert!(gone, "{path} was never deleted on node B");
    }

    fn enqueue_on_a(&self, kind: SyncEventKind, path: &str, descriptor: FileDescriptor) {
        let path = RelativePath::parse(path).expect("fixture path must be safe");
        self.a.node.enqueue(SyncEvent::new(kind, path, descriptor));
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyncHarness {
    fn drop(&mut self) {
        self.a.node.shutdown();
        self.b.node.shutdown();
    }
}
