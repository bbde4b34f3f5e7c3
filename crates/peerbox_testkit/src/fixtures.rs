//! Test fixtures: throwaway nodes with temp sync roots.

use peerbox_auth::{GroupRegistry, KeyPair};
use peerbox_engine::md5_hex;
use peerbox_node::{memory_pair, Node, NodeConfig, PeerConnection};
use peerbox_proto::FileDescriptor;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

/// Group name shared by all fixture nodes.
pub const TEST_GROUP: &str = "testers";

/// A node with a temporary sync root, cleaned up on drop.
pub struct TestNode {
    /// The running node.
    pub node: Node,
    /// The node's registry, for membership surgery in tests.
    pub registry: Arc<GroupRegistry>,
    sync_dir: TempDir,
}

impl TestNode {
    /// The node's sync root.
    pub fn sync_root(&self) -> &Path {
        self.sync_dir.path()
    }

    /// Writes `content` into the sync root and returns its descriptor.
    pub fn write_file(&self, path: &str, content: &[u8]) -> FileDescriptor {
        let full = self.sync_dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&full, content).expect("Failed to write fixture file");
        descriptor_for(content)
    }

    /// Reads a file from the sync root, if present.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.sync_dir.path().join(path)).ok()
    }

    /// Removes a file from the sync root.
    pub fn remove_file(&self, path: &str) {
        std::fs::remove_file(self.sync_dir.path().join(path)).expect("Failed to remove file");
    }
}

/// The descriptor a freshly written `content` would carry.
pub fn descriptor_for(content: &[u8]) -> FileDescriptor {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as u64;
    FileDescriptor::new(md5_hex(content), now, content.len() as u64)
}

/// Two nodes that recognize each other as members of [`TEST_GROUP`].
///
/// Neither node is connected yet; use [`connect`] to wire them over an
/// in-memory transport pair.
pub fn node_pair(chunk_size: u64) -> (TestNode, TestNode) {
    let keys_a = KeyPair::generate();
    let keys_b = KeyPair::generate();
    let fp_a = keys_a.fingerprint();
    let fp_b = keys_b.fingerprint();

    let registry_a = Arc::new(GroupRegistry::new(keys_a));
    let registry_b = Arc::new(GroupRegistry::new(keys_b));
    for registry in [&registry_a, &registry_b] {
        registry
            .new_group(TEST_GROUP, "/sync/testers")
            .expect("Failed to create group");
        registry
            .add_member(TEST_GROUP, fp_a.clone())
            .expect("Failed to add member");
        registry
            .add_member(TEST_GROUP, fp_b.clone())
            .expect("Failed to add member");
    }

    let make = |registry: Arc<GroupRegistry>, port: u16| {
        let sync_dir = TempDir::new().expect("Failed to create temp sync root");
        let config = NodeConfig::new(TEST_GROUP, sync_dir.path())
            .with_advertise("127.0.0.1", port)
            .with_chunk_size(chunk_size)
            .with_read_timeout(Duration::from_millis(20));
        let node = Node::new(config, Arc::clone(&registry)).expect("Failed to create node");
        node.start().expect("Failed to start node");
        TestNode {
            node,
            registry,
            sync_dir,
        }
    };

    (make(registry_a, 9001), make(registry_b, 9002))
}

/// Authenticates `a` and `b` over an in-memory transport pair.
///
/// Returns the connection objects as seen by each side.
pub fn connect(a: &TestNode, b: &TestNode) -> (Arc<PeerConnection>, Arc<PeerConnection>) {
    let (end_a, end_b) = memory_pair();
    let server = {
        let node = a.node.clone();
        thread::spawn(move || node.serve_transport(Box::new(end_a)))
    };
    let conn_b = b
        .node
        .connect_transport(Box::new(end_b))
        .expect("Failed to connect");
    let conn_a = server
        .join()
        .expect("server thread panicked")
        .expect("Failed to serve");
    (conn_a, conn_b)
}

/// Polls `predicate` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}
