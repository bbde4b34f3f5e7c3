//! # Peerbox Authentication
//!
//! Identity keys, Merkle membership sets, and the group registry.
//!
//! This crate provides:
//! - X25519 identity key pairs with hex SHA-256 fingerprints
//! - Sealed challenge encryption (ephemeral X25519 + HKDF + AES-256-GCM)
//! - A content-addressed membership set with compact inclusion proofs
//! - Groups binding a membership set to a name and sync directory
//! - A registry owning groups and this node's key material
//!
//! ## Security Model
//!
//! A peer proves group membership by announcing its public-key fingerprint;
//! the responder checks its own membership set (responder-authoritative).
//! Possession of the private key is then proven by decrypting a random
//! secret sealed under the announced public key. The private key never
//! crosses the wire, and secret material is zeroized on drop.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod challenge;
mod error;
mod group;
mod keys;
mod merkle;
mod registry;

pub use challenge::{generate_secret, open_challenge, seal_challenge, SealedChallenge, SECRET_SIZE};
pub use error::{AuthError, AuthResult};
pub use group::{Group, GroupDefinition};
pub use keys::{public_key_from_base64, Fingerprint, KeyPair, PublicKey};
pub use merkle::{MembershipProof, MembershipSet};
pub use registry::GroupRegistry;
