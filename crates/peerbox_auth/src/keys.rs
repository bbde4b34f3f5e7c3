//! Identity key pairs and fingerprints.

use crate::error::{AuthError, AuthResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

pub use x25519_dalek::PublicKey;

/// A stable identity string derived from a public key.
///
/// Lowercase hex SHA-256 of the raw public key bytes. Used as the Merkle
/// leaf value and as the connection identity on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a public key.
    pub fn of(public_key: &PublicKey) -> Self {
        let digest = Sha256::digest(public_key.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wraps an already-rendered fingerprint string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex rendering.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// This node's identity key pair.
///
/// The secret key never leaves this struct except through the key file;
/// in-memory copies are zeroized on drop by the underlying `StaticSecret`.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstructs a key pair from raw secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Returns the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Returns the base64 rendering of the public key, as announced on
    /// the wire.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Returns this identity's fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.public)
    }

    /// Returns the secret key for Diffie-Hellman.
    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Loads a key pair from a JSON key file.
    pub fn load(path: &Path) -> AuthResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::KeyStorage(format!("{}: {}", path.display(), e)))?;
        let file: KeyFile = serde_json::from_str(&contents)
            .map_err(|e| AuthError::KeyStorage(format!("{}: {}", path.display(), e)))?;

        let decoded = Zeroizing::new(
            BASE64
                .decode(&file.secret_key)
                .map_err(|e| AuthError::KeyStorage(format!("invalid secret key: {}", e)))?,
        );
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            AuthError::KeyStorage(format!(
                "secret key must be 32 bytes, got {}",
                decoded.len()
            ))
        })?;

        Ok(Self::from_secret_bytes(bytes))
    }

    /// Saves the key pair to a JSON key file.
    pub fn save(&self, path: &Path) -> AuthResult<()> {
        let file = KeyFile {
            secret_key: BASE64.encode(self.secret.to_bytes()),
        };
        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| AuthError::KeyStorage(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Parses a base64 wire public key.
pub fn public_key_from_base64(encoded: &str) -> AuthResult<PublicKey> {
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| AuthError::Crypto(format!("invalid public key: {}", e)))?;
    let bytes: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::Crypto(format!("public key must be 32 bytes, got {}", decoded.len())))?;
    Ok(PublicKey::from(bytes))
}

/// On-disk key file shape.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    secret_key: String,
}
