//! Peer-to-peer node: transports, the authentication handshake, peer
//! connections, and the node context that ties them to the sync engine.
//!
//! A [`Node`] owns the group registry, the live connection directory,
//! the outbound event queue, and a supervised worker pool. Connections
//! arrive over a [`Transport`] (TCP in production, in-memory pairs in
//! tests), authenticate via [`handshake`], and then run the per-peer
//! sync engine until the link drops.

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod server;
pub mod transport;

pub use config::NodeConfig;
pub use connection::{AuthState, PeerConnection};
pub use directory::PeerDirectory;
pub use error::{NodeError, NodeResult};
pub use handshake::{HandshakePeer, LocalIdentity, NOT_A_MEMBER};
pub use server::Node;
pub use transport::{
    memory_pair, MemoryTransport, TcpTransport, TcpTransportListener, Transport, TransportListener,
};
