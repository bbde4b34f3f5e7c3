//! The node: context object wiring registry, directory, queue, store,
//! and supervisor together.

use crate::config::NodeConfig;
use crate::connection::PeerConnection;
use crate::directory::PeerDirectory;
use crate::error::{NodeError, NodeResult};
use crate::handshake::{self, HandshakePeer};
use crate::transport::{TcpTransport, TcpTransportListener, Transport, TransportListener};
use parking_lot::Mutex;
use peerbox_auth::GroupRegistry;
use peerbox_engine::{FileStore, LocalStore, SyncEngine, SyncEvent};
use peerbox_proto::Message;
use peerbox_runtime::{CancelToken, EventQueue, SupervisedTask, TaskHandle, TaskSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive undecodable documents tolerated before the connection is
/// closed as a defensive measure.
const MAX_PROTOCOL_ERRORS: u32 = 3;

struct NodeShared {
    config: NodeConfig,
    registry: Arc<GroupRegistry>,
    directory: Arc<PeerDirectory>,
    queue: Arc<EventQueue<SyncEvent>>,
    store: Arc<LocalStore>,
    supervisor: TaskSupervisor,
    service_handles: Mutex<Vec<TaskHandle>>,
}

/// A running Peerbox node.
///
/// Everything a connection handler or dispatcher needs hangs off this
/// explicitly constructed context; there is no ambient global state, so
/// tests run several nodes in one process.
#[derive(Clone)]
pub struct Node {
    shared: Arc<NodeShared>,
}

impl Node {
    /// Creates a node. The sync root is created if missing.
    pub fn new(config: NodeConfig, registry: Arc<GroupRegistry>) -> NodeResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.sync_root)?;
        let store = Arc::new(LocalStore::new(&config.sync_root));
        let supervisor = TaskSupervisor::new(config.workers);

        Ok(Self {
            shared: Arc::new(NodeShared {
                config,
                registry,
                directory: Arc::new(PeerDirectory::new()),
                queue: Arc::new(EventQueue::new()),
                store,
                supervisor,
                service_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Starts dispatchers, the listener (if configured), and the initial
    /// outbound connections.
    pub fn start(&self) -> NodeResult<()> {
        let mut handles = self.shared.service_handles.lock();

        for _ in 0..self.shared.config.dispatchers {
            let task = DispatcherTask {
                queue: Arc::clone(&self.shared.queue),
                directory: Arc::clone(&self.shared.directory),
            };
            handles.push(self.shared.supervisor.submit(Arc::new(task)));
        }

        if let Some(addr) = &self.shared.config.listen_addr {
            let listener = TcpTransportListener::bind(addr)?;
            info!(addr = %listener.local_addr()?, "listening for peers");
            let task = AcceptTask {
                listener: Box::new(listener),
                node: self.clone(),
            };
            handles.push(self.shared.supervisor.submit(Arc::new(task)));
        }
        drop(handles);

        for peer in self.shared.config.peers.clone() {
            if let Err(e) = self.connect(&peer) {
                warn!(peer = %peer, error = %e, "initial connection failed");
            }
        }
        Ok(())
    }

    /// Connects out to `addr` ("host:port") and authenticates.
    pub fn connect(&self, addr: &str) -> NodeResult<Arc<PeerConnection>> {
        let transport = TcpTransport::connect(addr, self.shared.config.handshake_timeout())?;
        self.connect_transport(Box::new(transport))
    }

    /// Runs the initiator handshake over an established transport.
    pub fn connect_transport(
        &self,
        transport: Box<dyn Transport>,
    ) -> NodeResult<Arc<PeerConnection>> {
        let conn = Arc::new(PeerConnection::new(transport));
        let peer = handshake::initiate(
            &conn,
            &self.shared.registry,
            &self.shared.config.identity(),
            &self.shared.config.group,
            self.shared.config.handshake_timeout(),
        )?;
        self.register(conn, peer)
    }

    /// Runs the responder handshake over an accepted transport.
    pub fn serve_transport(
        &self,
        transport: Box<dyn Transport>,
    ) -> NodeResult<Arc<PeerConnection>> {
        let conn = Arc::new(PeerConnection::new(transport));
        let peer = handshake::respond(
            &conn,
            &self.shared.registry,
            &self.shared.config.identity(),
            self.shared.config.handshake_timeout(),
        )?;
        self.register(conn, peer)
    }

    /// Queues a local change for dispatch to all active peers.
    ///
    /// Returns whether the event was newly queued (an identical pending
    /// event deduplicates).
    pub fn enqueue(&self, event: SyncEvent) -> bool {
        self.shared.queue.add(event)
    }

    /// The live connection set.
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.shared.directory
    }

    /// The authentication authority.
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.shared.registry
    }

    /// This node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Stops services, closes every connection, and joins the workers.
    pub fn shutdown(&self) {
        for handle in self.shared.service_handles.lock().drain(..) {
            handle.cancel();
        }
        self.shared.directory.close_all();
        self.shared.supervisor.shutdown();
    }

    fn register(
        &self,
        conn: Arc<PeerConnection>,
        peer: HandshakePeer,
    ) -> NodeResult<Arc<PeerConnection>> {
        conn.set_fingerprint(peer.fingerprint.clone());
        conn.set_remote(format!("{}:{}", peer.host, peer.port));

        let store: Arc<dyn FileStore> = Arc::clone(&self.shared.store) as Arc<dyn FileStore>;
        conn.activate(SyncEngine::new(store, self.shared.config.engine_config()));
        self.shared.directory.insert(Arc::clone(&conn));

        let task = ConnectionTask {
            conn: Arc::clone(&conn),
            directory: Arc::clone(&self.shared.directory),
            read_timeout: self.shared.config.read_timeout(),
        };
        conn.attach_task(self.shared.supervisor.submit(Arc::new(task)));

        info!(
            remote = %conn.remote(),
            fingerprint = %peer.fingerprint,
            group = %peer.group,
            "peer connection active"
        );
        Ok(conn)
    }
}

/// Supervised read loop for one authenticated connection.
///
/// A panic respawns the loop over the still-open connection; a transport
/// failure closes the connection, which cancels this task so the
/// supervisor does not revive a dead link.
struct ConnectionTask {
    conn: Arc<PeerConnection>,
    directory: Arc<PeerDirectory>,
    read_timeout: Duration,
}

impl ConnectionTask {
    fn disconnect(&self) {
        self.directory.remove(&self.conn.remote());
        self.conn.close();
    }
}

impl SupervisedTask for ConnectionTask {
    fn name(&self) -> &str {
        "peer-connection"
    }

    fn run(&self, token: &CancelToken) {
        let mut protocol_errors = 0u32;
        while !token.is_cancelled() && self.conn.is_active() {
            match self.conn.recv(self.read_timeout) {
                Ok(Some(message)) => {
                    protocol_errors = 0;
                    if let Err(e) = self.conn.handle_inbound(message) {
                        warn!(remote = %self.conn.remote(), error = %e, "send failed");
                        self.disconnect();
                        return;
                    }
                }
                Ok(None) => self.conn.sweep_stalled(),
                Err(NodeError::Protocol(e)) => {
                    warn!(remote = %self.conn.remote(), error = %e, "undecodable document");
                    let _ = self.conn.send(&Message::invalid_protocol(e.to_string()));
                    protocol_errors += 1;
                    if protocol_errors >= MAX_PROTOCOL_ERRORS {
                        warn!(remote = %self.conn.remote(), "too many protocol errors, closing");
                        self.disconnect();
                        return;
                    }
                }
                Err(e) => {
                    debug!(remote = %self.conn.remote(), error = %e, "transport down");
                    self.disconnect();
                    return;
                }
            }
        }
    }
}

/// Supervised dispatcher: drains the event queue and proposes each event
/// to every active connection.
struct DispatcherTask {
    queue: Arc<EventQueue<SyncEvent>>,
    directory: Arc<PeerDirectory>,
}

impl SupervisedTask for DispatcherTask {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn run(&self, token: &CancelToken) {
        while !token.is_cancelled() {
            let Some(event) = self.queue.take_timeout(Duration::from_millis(200)) else {
                continue;
            };
            for conn in self.directory.snapshot() {
                if !conn.is_active() {
                    continue;
                }
                if let Err(e) = conn.propose_event(&event) {
                    warn!(remote = %conn.remote(), error = %e, "event dispatch failed");
                }
            }
        }
    }
}

/// Supervised accept loop.
struct AcceptTask {
    listener: Box<dyn TransportListener>,
    node: Node,
}

impl SupervisedTask for AcceptTask {
    fn name(&self) -> &str {
        "accept-loop"
    }

    fn run(&self, token: &CancelToken) {
        while !token.is_cancelled() {
            match self.listener.accept(Duration::from_millis(250)) {
                Ok(Some(transport)) => {
                    let label = transport.peer_label();
                    if let Err(e) = self.node.serve_transport(transport) {
                        warn!(remote = %label, error = %e, "inbound connection rejected");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    token.wait_timeout(Duration::from_secs(1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AuthState;
    use crate::transport::memory_pair;
    use peerbox_auth::KeyPair;
    use std::thread;
    use tempfile::TempDir;

    fn node_pair() -> (TempDir, Node, TempDir, Node) {
        let keys_a = KeyPair::generate();
        let keys_b = KeyPair::generate();
        let fp_a = keys_a.fingerprint();
        let fp_b = keys_b.fingerprint();

        let registry_a = Arc::new(GroupRegistry::new(keys_a));
        let registry_b = Arc::new(GroupRegistry::new(keys_b));
        for registry in [&registry_a, &registry_b] {
            registry.new_group("g1", "/sync/g1").unwrap();
            registry.add_member("g1", fp_a.clone()).unwrap();
            registry.add_member("g1", fp_b.clone()).unwrap();
        }

        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let config = |root: &std::path::Path, port: u16| {
            NodeConfig::new("g1", root)
                .with_advertise("127.0.0.1", port)
                .with_read_timeout(Duration::from_millis(50))
        };
        let node_a = Node::new(config(dir_a.path(), 1001), registry_a).unwrap();
        let node_b = Node::new(config(dir_b.path(), 1002), registry_b).unwrap();
        (dir_a, node_a, dir_b, node_b)
    }

    #[test]
    fn nodes_authenticate_over_memory_transport() {
        let (_dir_a, node_a, _dir_b, node_b) = node_pair();
        let (end_a, end_b) = memory_pair();

        let server = {
            let node_a = node_a.clone();
            thread::spawn(move || node_a.serve_transport(Box::new(end_a)))
        };
        let conn_b = node_b.connect_transport(Box::new(end_b)).unwrap();
        let conn_a = server.join().unwrap().unwrap();

        assert_eq!(conn_a.state(), AuthState::Active);
        assert_eq!(conn_b.state(), AuthState::Active);
        assert_eq!(node_a.directory().len(), 1);
        assert_eq!(node_b.directory().len(), 1);
        assert_eq!(conn_a.remote(), "127.0.0.1:1002");

        node_a.shutdown();
        node_b.shutdown();
    }

    #[test]
    fn non_member_never_goes_active() {
        let (_dir_a, node_a, _dir_b, node_b) = node_pair();
        // Node A no longer recognizes node B.
        node_a
            .registry()
            .remove_member("g1", &node_b.registry().fingerprint())
            .unwrap();

        let (end_a, end_b) = memory_pair();
        let server = {
            let node_a = node_a.clone();
            thread::spawn(move || node_a.serve_transport(Box::new(end_a)))
        };

        let result = node_b.connect_transport(Box::new(end_b));
        assert!(matches!(result, Err(NodeError::Refused(_))));
        assert!(matches!(
            server.join().unwrap(),
            Err(NodeError::Refused(_))
        ));
        assert!(node_a.directory().is_empty());
        assert!(node_b.directory().is_empty());

        node_a.shutdown();
        node_b.shutdown();
    }

    #[test]
    fn enqueue_deduplicates_pending_events() {
        let (_dir_a, node_a, _dir_b, _node_b) = node_pair();
        let event = SyncEvent::new(
            peerbox_engine::SyncEventKind::Create,
            peerbox_engine::RelativePath::parse("a.txt").unwrap(),
            peerbox_proto::FileDescriptor::new("abc", 0, 1),
        );

        assert!(node_a.enqueue(event.clone()));
        assert!(!node_a.enqueue(event));
        node_a.shutdown();
    }
}
