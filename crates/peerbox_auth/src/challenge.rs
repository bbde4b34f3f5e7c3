//! Sealed challenge encryption.
//!
//! A challenge is a random secret sealed under the recipient's public key:
//!
//! ```text
//! shared  = x25519(ephemeral_sk, recipient_pk)
//! key     = HKDF-SHA256(shared, "peerbox-challenge-v1")
//! sealed  = ephemeral_pk || nonce || AES-256-GCM(key, nonce, secret)
//! ```
//!
//! Only the holder of the matching private key can recover the secret, so
//! returning it proves possession without the key ever crossing the wire.

use crate::error::{AuthError, AuthResult};
use crate::keys::{KeyPair, PublicKey};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::StaticSecret;

/// Size of a challenge secret in bytes.
pub const SECRET_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Domain separation string for key derivation.
const HKDF_INFO: &[u8] = b"peerbox-challenge-v1";

/// A challenge secret encrypted under a peer's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChallenge {
    /// Ephemeral X25519 public key used for this challenge.
    pub ephemeral_pk: [u8; 32],
    /// AES-GCM nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with appended authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SealedChallenge {
    /// Renders the sealed challenge for the `AUTH_CHALLENGE` wire field.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(32 + NONCE_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.ephemeral_pk);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        BASE64.encode(bytes)
    }

    /// Parses a sealed challenge from its wire rendering.
    pub fn from_base64(encoded: &str) -> AuthResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| AuthError::Crypto(format!("invalid challenge encoding: {}", e)))?;
        if bytes.len() <= 32 + NONCE_SIZE {
            return Err(AuthError::Crypto(format!(
                "challenge too short: {} bytes",
                bytes.len()
            )));
        }

        let mut ephemeral_pk = [0u8; 32];
        ephemeral_pk.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[32..32 + NONCE_SIZE]);

        Ok(Self {
            ephemeral_pk,
            nonce,
            ciphertext: bytes[32 + NONCE_SIZE..].to_vec(),
        })
    }
}

/// Generates a fresh random challenge secret.
pub fn generate_secret() -> [u8; SECRET_SIZE] {
    let mut secret = [0u8; SECRET_SIZE];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Seals a secret under `recipient`'s public key.
pub fn seal_challenge(recipient: &PublicKey, secret: &[u8]) -> AuthResult<SealedChallenge> {
    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(recipient);
    let key = derive_key(shared.as_bytes());

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), secret)
        .map_err(|_| AuthError::Crypto("challenge encryption failed".into()))?;

    Ok(SealedChallenge {
        ephemeral_pk: *ephemeral_public.as_bytes(),
        nonce,
        ciphertext,
    })
}

/// Opens a sealed challenge with this node's private key.
///
/// Fails if the challenge was sealed for a different key or was tampered
/// with in transit (GCM authentication).
pub fn open_challenge(keys: &KeyPair, sealed: &SealedChallenge) -> AuthResult<Vec<u8>> {
    let ephemeral_public = PublicKey::from(sealed.ephemeral_pk);
    let shared = keys.secret().diffie_hellman(&ephemeral_public);
    let key = derive_key(shared.as_bytes());

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    cipher
        .decrypt(
            GenericArray::from_slice(&sealed.nonce),
            sealed.ciphertext.as_slice(),
        )
        .map_err(|_| AuthError::Crypto("challenge decryption failed".into()))
}

/// Derives the AES key from the Diffie-Hellman shared secret.
fn derive_key(shared: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("HKDF expand cannot fail for 32-byte output");
    key
}
