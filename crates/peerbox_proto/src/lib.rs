//! # Peerbox Wire Protocol
//!
//! Message types and JSON codec for the Peerbox sync protocol.
//!
//! This crate provides:
//! - The `Message` enum covering every protocol command
//! - Request/response payload types with wire-exact field names
//! - A file descriptor type (`md5`, `lastModified`, `fileSize`)
//! - Encode/decode to one JSON document per message
//!
//! ## Wire Format
//!
//! Every message is a single JSON object carrying a `"command"` field plus
//! command-specific fields, one document per line on the transport. Byte
//! content inside `FILE_BYTES_RESPONSE` is base64-encoded so the document
//! stays valid UTF-8.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod descriptor;
mod error;
mod messages;

pub use descriptor::FileDescriptor;
pub use error::{ProtoError, ProtoResult};
pub use messages::{
    AuthChallenge, AuthResponse, ConnectionRefused, FileBytesRequest, FileBytesResponse,
    FileCreateRequest, FileCreateResponse, FileDeleteRequest, FileDeleteResponse,
    FileModifyRequest, FileModifyResponse, HandshakeRequest, HandshakeResponse, InvalidProtocol,
    Message,
};

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Hard upper bound on a single byte-range request, in bytes.
///
/// Both sides enforce this so no single wire message is unbounded.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;
