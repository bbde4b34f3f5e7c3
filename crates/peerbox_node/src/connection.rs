//! One authenticated logical link to a remote node.

use crate::error::{NodeError, NodeResult};
use crate::transport::Transport;
use parking_lot::Mutex;
use peerbox_auth::Fingerprint;
use peerbox_engine::{SyncEngine, SyncEvent};
use peerbox_proto::Message;
use peerbox_runtime::TaskHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Authentication state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Fresh connection; no identity announced yet.
    Unauthenticated,
    /// Identity accepted, challenge exchange in progress.
    Challenged,
    /// Mutually authenticated; sync traffic flows.
    Active,
    /// Torn down. Terminal.
    Closed,
}

/// A peer connection: transport, auth state, and (once active) the
/// per-connection protocol engine.
///
/// State transitions and the engine use per-connection locks, so
/// unrelated connections never contend.
pub struct PeerConnection {
    transport: Box<dyn Transport>,
    state: Mutex<AuthState>,
    remote: Mutex<String>,
    fingerprint: Mutex<Option<Fingerprint>>,
    engine: Mutex<Option<SyncEngine>>,
    task: Mutex<Option<TaskHandle>>,
    last_activity: Mutex<Instant>,
}

impl PeerConnection {
    /// Wraps a freshly accepted or connected transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let remote = transport.peer_label();
        Self {
            transport,
            state: Mutex::new(AuthState::Unauthenticated),
            remote: Mutex::new(remote),
            fingerprint: Mutex::new(None),
            engine: Mutex::new(None),
            task: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Current authentication state.
    pub fn state(&self) -> AuthState {
        *self.state.lock()
    }

    /// Moves to `next`. `Closed` is absorbing.
    pub fn set_state(&self, next: AuthState) {
        let mut state = self.state.lock();
        if *state == AuthState::Closed {
            return;
        }
        debug!(remote = %self.remote.lock(), from = ?*state, to = ?next, "connection state change");
        *state = next;
    }

    /// Returns true while sync traffic is allowed.
    pub fn is_active(&self) -> bool {
        self.state() == AuthState::Active
    }

    /// Remote "host:port" label.
    pub fn remote(&self) -> String {
        self.remote.lock().clone()
    }

    /// Replaces the remote label with the peer's advertised address.
    pub fn set_remote(&self, remote: impl Into<String>) {
        *self.remote.lock() = remote.into();
    }

    /// The authenticated peer's fingerprint, once the handshake ran.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint.lock().clone()
    }

    /// Records the authenticated peer's fingerprint.
    pub fn set_fingerprint(&self, fingerprint: Fingerprint) {
        *self.fingerprint.lock() = Some(fingerprint);
    }

    /// Installs the protocol engine and opens the connection for sync
    /// traffic.
    pub fn activate(&self, engine: SyncEngine) {
        *self.engine.lock() = Some(engine);
        self.set_state(AuthState::Active);
    }

    /// Attaches the supervised read-loop handle, used by `close`.
    pub fn attach_task(&self, handle: TaskHandle) {
        *self.task.lock() = Some(handle);
    }

    /// Sends one message.
    pub fn send(&self, message: &Message) -> NodeResult<()> {
        let line = message.encode()?;
        self.transport.send_line(&line)?;
        self.touch();
        Ok(())
    }

    /// Receives the next message, if one arrives within `timeout`.
    ///
    /// An undecodable document is a protocol error; the caller answers
    /// with `INVALID_PROTOCOL` and the connection survives.
    pub fn recv(&self, timeout: Duration) -> NodeResult<Option<Message>> {
        match self.transport.recv_line(timeout)? {
            Some(line) => {
                self.touch();
                Ok(Some(Message::decode(&line)?))
            }
            None => Ok(None),
        }
    }

    /// Runs one inbound message through the protocol engine and sends
    /// the answers.
    ///
    /// Engine-level integrity and storage failures are logged here and
    /// do not kill the connection; only send failures propagate.
    pub fn handle_inbound(&self, message: Message) -> NodeResult<()> {
        if !self.is_active() {
            self.send(&Message::invalid_protocol(
                "sync message on an inactive connection",
            ))?;
            return Ok(());
        }

        let replies = {
            let mut engine = self.engine.lock();
            match engine.as_mut() {
                Some(engine) => engine.handle_message(message),
                None => return Ok(()),
            }
        };

        match replies {
            Ok(replies) => {
                for reply in replies {
                    self.send(&reply)?;
                }
                Ok(())
            }
            Err(e) => {
                error!(remote = %self.remote(), error = %e, "transfer failed");
                Ok(())
            }
        }
    }

    /// Proposes a local change event to this peer.
    pub fn propose_event(&self, event: &SyncEvent) -> NodeResult<()> {
        if !self.is_active() {
            return Err(NodeError::transport_fatal("connection is not active"));
        }
        let proposal = {
            let engine = self.engine.lock();
            match engine.as_ref() {
                Some(engine) => engine.propose(event),
                None => return Ok(()),
            }
        };
        self.send(&proposal)
    }

    /// Aborts transfers that stopped making progress.
    pub fn sweep_stalled(&self) {
        let mut engine = self.engine.lock();
        if let Some(engine) = engine.as_mut() {
            for path in engine.abort_stalled() {
                warn!(remote = %self.remote(), %path, "aborted stalled transfer");
            }
        }
    }

    /// Tears the connection down: cancels the read loop, closes the
    /// transport, and moves to `Closed`. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == AuthState::Closed {
                return;
            }
            *state = AuthState::Closed;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.cancel();
        }
        self.transport.close();
        info!(remote = %self.remote(), "connection closed");
    }

    /// Time since the last message in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}
