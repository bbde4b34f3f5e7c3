//! The set of live peer connections.

use crate::connection::PeerConnection;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Owns every live connection, keyed by the peer's "host:port" label.
///
/// Broadcast-style operations iterate a snapshot, so they tolerate a
/// concurrent removal without error; a connection removed mid-broadcast
/// simply refuses the send on its own lock.
#[derive(Default)]
pub struct PeerDirectory {
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its remote label, replacing (and
    /// closing) any previous connection to the same peer.
    pub fn insert(&self, conn: Arc<PeerConnection>) {
        let key = conn.remote();
        let previous = self.connections.write().insert(key.clone(), conn);
        if let Some(previous) = previous {
            debug!(remote = %key, "replacing existing connection to peer");
            previous.close();
        }
    }

    /// Removes a connection by remote label.
    pub fn remove(&self, remote: &str) -> Option<Arc<PeerConnection>> {
        self.connections.write().remove(remote)
    }

    /// Looks up a connection by remote label.
    pub fn get(&self, remote: &str) -> Option<Arc<PeerConnection>> {
        self.connections.read().get(remote).cloned()
    }

    /// A point-in-time copy of all connections, for broadcast.
    pub fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns true if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Closes and removes every connection.
    pub fn close_all(&self) {
        let drained: Vec<Arc<PeerConnection>> =
            self.connections.write().drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}
