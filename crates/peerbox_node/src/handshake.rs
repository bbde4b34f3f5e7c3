//! The authentication handshake.
//!
//! Sequence, initiator on the left:
//!
//! ```text
//! HANDSHAKE_REQUEST  -->        (membership check; refuse and close if absent)
//!                    <--  HANDSHAKE_RESPONSE
//!                    <--  AUTH_CHALLENGE      (responder challenges initiator)
//! AUTH_RESPONSE      -->        (verify; close on mismatch)
//! AUTH_CHALLENGE     -->        (initiator challenges responder)
//!                    <--  AUTH_RESPONSE       (verify; close on mismatch)
//! ```
//!
//! Membership is responder-authoritative: each side checks the other's
//! fingerprint against its own local membership set, never against a
//! transmitted proof. Both directions must prove private-key possession
//! before either side goes active.

use crate::connection::{AuthState, PeerConnection};
use crate::error::{NodeError, NodeResult};
use peerbox_auth::{
    generate_secret, public_key_from_base64, seal_challenge, Fingerprint, GroupRegistry,
    SealedChallenge,
};
use peerbox_proto::{
    AuthChallenge, AuthResponse, ConnectionRefused, HandshakeRequest, HandshakeResponse, Message,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Refusal reason for a fingerprint outside the membership set.
pub const NOT_A_MEMBER: &str = "fingerprint is not a member of the group";

/// This node's announced connectivity.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Host peers can reach this node on.
    pub host: String,
    /// Port peers can reach this node on.
    pub port: u16,
}

/// The authenticated remote identity a completed handshake yields.
#[derive(Debug, Clone)]
pub struct HandshakePeer {
    /// The peer's public-key fingerprint.
    pub fingerprint: Fingerprint,
    /// Host the peer accepts connections on.
    pub host: String,
    /// Port the peer accepts connections on.
    pub port: u16,
    /// Group both sides agreed to synchronize.
    pub group: String,
}

/// Drives the initiator side of the handshake.
///
/// On success the connection is ready to be activated; any failure
/// closes it.
pub fn initiate(
    conn: &PeerConnection,
    registry: &GroupRegistry,
    identity: &LocalIdentity,
    group_name: &str,
    timeout: Duration,
) -> NodeResult<HandshakePeer> {
    let deadline = Instant::now() + timeout;

    conn.send(&Message::HandshakeRequest(HandshakeRequest {
        fingerprint: registry.fingerprint().as_str().to_string(),
        public_key: registry.public_key_base64(),
        group_name: group_name.to_string(),
        host: identity.host.clone(),
        port: identity.port,
    }))?;

    let response = match recv_within(conn, deadline)? {
        Message::HandshakeResponse(response) => response,
        Message::ConnectionRefused(refusal) => {
            debug!(reason = %refusal.message, "handshake refused by responder");
            conn.close();
            return Err(NodeError::Refused(refusal.message));
        }
        other => return Err(unexpected(conn, &other)),
    };

    let peer_fingerprint = Fingerprint::from_hex(response.fingerprint.clone());
    // The responder must be a member of the group we hold locally too.
    if !registry.authorize(group_name, &peer_fingerprint) {
        refuse(conn, NOT_A_MEMBER);
        return Err(NodeError::AuthenticationFailed(NOT_A_MEMBER.into()));
    }
    let peer_key = announced_key(conn, &response.public_key, &peer_fingerprint)?;
    conn.set_state(AuthState::Challenged);

    // Answer the responder's challenge first.
    let challenge = match recv_within(conn, deadline)? {
        Message::AuthChallenge(challenge) => challenge,
        Message::ConnectionRefused(refusal) => {
            conn.close();
            return Err(NodeError::Refused(refusal.message));
        }
        other => return Err(unexpected(conn, &other)),
    };
    answer_challenge(conn, registry, &challenge)?;

    // Then issue our own.
    let secret = generate_secret();
    issue_challenge(conn, &peer_key, &secret)?;
    let answer = match recv_within(conn, deadline)? {
        Message::AuthResponse(answer) => answer,
        other => return Err(unexpected(conn, &other)),
    };
    verify_answer(conn, &answer, &secret)?;

    Ok(HandshakePeer {
        fingerprint: peer_fingerprint,
        host: response.host,
        port: response.port,
        group: group_name.to_string(),
    })
}

/// Drives the responder side of the handshake.
pub fn respond(
    conn: &PeerConnection,
    registry: &GroupRegistry,
    identity: &LocalIdentity,
    timeout: Duration,
) -> NodeResult<HandshakePeer> {
    let deadline = Instant::now() + timeout;

    let request = match recv_within(conn, deadline)? {
        Message::HandshakeRequest(request) => request,
        other => return Err(unexpected(conn, &other)),
    };

    let peer_fingerprint = Fingerprint::from_hex(request.fingerprint.clone());
    if !registry.authorize(&request.group_name, &peer_fingerprint) {
        warn!(
            fingerprint = %peer_fingerprint,
            group = %request.group_name,
            "refusing connection from non-member"
        );
        refuse(conn, NOT_A_MEMBER);
        return Err(NodeError::Refused(NOT_A_MEMBER.into()));
    }
    let peer_key = announced_key(conn, &request.public_key, &peer_fingerprint)?;

    conn.send(&Message::HandshakeResponse(HandshakeResponse {
        fingerprint: registry.fingerprint().as_str().to_string(),
        public_key: registry.public_key_base64(),
        host: identity.host.clone(),
        port: identity.port,
    }))?;
    conn.set_state(AuthState::Challenged);

    // Challenge the initiator first.
    let secret = generate_secret();
    issue_challenge(conn, &peer_key, &secret)?;
    let answer = match recv_within(conn, deadline)? {
        Message::AuthResponse(answer) => answer,
        other => return Err(unexpected(conn, &other)),
    };
    verify_answer(conn, &answer, &secret)?;

    // Then answer the initiator's challenge.
    let challenge = match recv_within(conn, deadline)? {
        Message::AuthChallenge(challenge) => challenge,
        other => return Err(unexpected(conn, &other)),
    };
    answer_challenge(conn, registry, &challenge)?;

    Ok(HandshakePeer {
        fingerprint: peer_fingerprint,
        host: request.host,
        port: request.port,
        group: request.group_name,
    })
}

/// Sends a refusal and closes; best effort, the peer may already be gone.
fn refuse(conn: &PeerConnection, reason: &str) {
    let _ = conn.send(&Message::ConnectionRefused(ConnectionRefused {
        message: reason.to_string(),
    }));
    conn.close();
}

fn recv_within(conn: &PeerConnection, deadline: Instant) -> NodeResult<Message> {
    let now = Instant::now();
    if now >= deadline {
        conn.close();
        return Err(NodeError::HandshakeTimeout);
    }
    match conn.recv(deadline - now) {
        Ok(Some(message)) => Ok(message),
        Ok(None) => {
            conn.close();
            Err(NodeError::HandshakeTimeout)
        }
        Err(e) => {
            conn.close();
            Err(e)
        }
    }
}

/// Parses the announced public key and checks it matches the announced
/// fingerprint, so a peer cannot borrow someone else's identity.
fn announced_key(
    conn: &PeerConnection,
    encoded: &str,
    fingerprint: &Fingerprint,
) -> NodeResult<peerbox_auth::PublicKey> {
    let key = match public_key_from_base64(encoded) {
        Ok(key) => key,
        Err(e) => {
            conn.close();
            return Err(NodeError::AuthenticationFailed(e.to_string()));
        }
    };
    if Fingerprint::of(&key) != *fingerprint {
        conn.close();
        return Err(NodeError::AuthenticationFailed(
            "public key does not match the announced fingerprint".into(),
        ));
    }
    Ok(key)
}

fn issue_challenge(
    conn: &PeerConnection,
    peer_key: &peerbox_auth::PublicKey,
    secret: &[u8],
) -> NodeResult<()> {
    let sealed = match seal_challenge(peer_key, secret) {
        Ok(sealed) => sealed,
        Err(e) => {
            conn.close();
            return Err(NodeError::AuthenticationFailed(e.to_string()));
        }
    };
    conn.send(&Message::AuthChallenge(AuthChallenge {
        challenge: sealed.to_base64(),
    }))
}

fn answer_challenge(
    conn: &PeerConnection,
    registry: &GroupRegistry,
    challenge: &AuthChallenge,
) -> NodeResult<()> {
    let recovered = SealedChallenge::from_base64(&challenge.challenge)
        .and_then(|sealed| registry.solve_challenge(&sealed));
    match recovered {
        Ok(secret) => conn.send(&Message::AuthResponse(AuthResponse {
            secret: hex::encode(secret),
        })),
        Err(e) => {
            conn.close();
            Err(NodeError::AuthenticationFailed(e.to_string()))
        }
    }
}

fn verify_answer(conn: &PeerConnection, answer: &AuthResponse, secret: &[u8]) -> NodeResult<()> {
    if answer.secret == hex::encode(secret) {
        Ok(())
    } else {
        conn.close();
        Err(NodeError::AuthenticationFailed(
            "challenge response mismatch".into(),
        ))
    }
}

fn unexpected(conn: &PeerConnection, message: &Message) -> NodeError {
    let _ = conn.send(&Message::invalid_protocol(format!(
        "unexpected {} during handshake",
        message.command()
    )));
    conn.close();
    NodeError::AuthenticationFailed(format!(
        "unexpected {} during handshake",
        message.command()
    ))
}
