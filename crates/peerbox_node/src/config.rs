//! Node configuration.

use crate::error::{NodeError, NodeResult};
use crate::handshake::LocalIdentity;
use peerbox_engine::{EngineConfig, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one node.
///
/// Loadable from a JSON file; every field has a default so a minimal
/// file only needs `group` and `syncRoot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Address to accept inbound connections on; `None` disables the
    /// listener (outbound-only node).
    pub listen_addr: Option<String>,
    /// Host announced to peers in the handshake.
    pub advertise_host: String,
    /// Port announced to peers in the handshake.
    pub advertise_port: u16,
    /// Group this node synchronizes.
    pub group: String,
    /// Directory tree kept in sync.
    pub sync_root: PathBuf,
    /// Identity key file.
    pub key_file: Option<PathBuf>,
    /// Persisted group definitions.
    pub group_file: Option<PathBuf>,
    /// Peers ("host:port") to connect to at startup.
    pub peers: Vec<String>,
    /// Bytes per byte-range request.
    pub chunk_size: u64,
    /// Dispatcher workers draining the event queue.
    pub dispatchers: usize,
    /// Supervisor worker threads. Service loops (accept, dispatchers)
    /// and per-connection read loops each occupy one while running.
    pub workers: usize,
    /// Handshake window in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Read-loop poll interval in milliseconds.
    pub read_timeout_ms: u64,
    /// Transfer stall window in milliseconds.
    pub stall_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            advertise_host: "127.0.0.1".into(),
            advertise_port: 8440,
            group: String::new(),
            sync_root: PathBuf::from("."),
            key_file: None,
            group_file: None,
            peers: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            dispatchers: 2,
            workers: 8,
            handshake_timeout_ms: 10_000,
            read_timeout_ms: 500,
            stall_timeout_ms: 30_000,
        }
    }
}

impl NodeConfig {
    /// Creates a configuration for `group` synchronizing `sync_root`.
    pub fn new(group: impl Into<String>, sync_root: impl Into<PathBuf>) -> Self {
        Self {
            group: group.into(),
            sync_root: sync_root.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> NodeResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Sets the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Sets the advertised host and port.
    pub fn with_advertise(mut self, host: impl Into<String>, port: u16) -> Self {
        self.advertise_host = host.into();
        self.advertise_port = port;
        self
    }

    /// Adds a startup peer.
    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peers.push(addr.into());
        self
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the handshake window.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the read-loop poll interval.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the dispatcher count.
    pub fn with_dispatchers(mut self, count: usize) -> Self {
        self.dispatchers = count;
        self
    }

    /// The handshake window.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// The read-loop poll interval.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Engine configuration derived from this node configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_chunk_size(self.chunk_size)
            .with_stall_timeout(Duration::from_millis(self.stall_timeout_ms))
    }

    /// The connectivity announced to peers.
    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity {
            host: self.advertise_host.clone(),
            port: self.advertise_port,
        }
    }

    /// Validates fields no node can run without.
    pub fn validate(&self) -> NodeResult<()> {
        if self.group.is_empty() {
            return Err(NodeError::Config("group name is required".into()));
        }
        if self.workers == 0 || self.dispatchers == 0 {
            return Err(NodeError::Config(
                "worker and dispatcher counts must be nonzero".into(),
            ));
        }
        Ok(())
    }
}
