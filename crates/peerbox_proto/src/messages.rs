//! Protocol messages.

use crate::descriptor::FileDescriptor;
use crate::error::{ProtoError, ProtoResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A wire protocol message.
///
/// Serializes as a single JSON object with a `"command"` discriminator and
/// the variant's fields inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Message {
    /// Identity announcement from the connection initiator.
    #[serde(rename = "HANDSHAKE_REQUEST")]
    HandshakeRequest(HandshakeRequest),
    /// Identity announcement from the responder.
    #[serde(rename = "HANDSHAKE_RESPONSE")]
    HandshakeResponse(HandshakeResponse),
    /// Encrypted authentication challenge.
    #[serde(rename = "AUTH_CHALLENGE")]
    AuthChallenge(AuthChallenge),
    /// Recovered challenge secret.
    #[serde(rename = "AUTH_RESPONSE")]
    AuthResponse(AuthResponse),
    /// Connection refusal with a reason.
    #[serde(rename = "CONNECTION_REFUSED")]
    ConnectionRefused(ConnectionRefused),
    /// Proposal to create a file.
    #[serde(rename = "FILE_CREATE_REQUEST")]
    FileCreateRequest(FileCreateRequest),
    /// Answer to a create proposal.
    #[serde(rename = "FILE_CREATE_RESPONSE")]
    FileCreateResponse(FileCreateResponse),
    /// Proposal to replace an existing file's content.
    #[serde(rename = "FILE_MODIFY_REQUEST")]
    FileModifyRequest(FileModifyRequest),
    /// Answer to a modify proposal.
    #[serde(rename = "FILE_MODIFY_RESPONSE")]
    FileModifyResponse(FileModifyResponse),
    /// Request for a byte range of a file under transfer.
    #[serde(rename = "FILE_BYTES_REQUEST")]
    FileBytesRequest(FileBytesRequest),
    /// Byte range content (or a failure) for a transfer.
    #[serde(rename = "FILE_BYTES_RESPONSE")]
    FileBytesResponse(FileBytesResponse),
    /// Proposal to delete a file.
    #[serde(rename = "FILE_DELETE_REQUEST")]
    FileDeleteRequest(FileDeleteRequest),
    /// Answer to a delete proposal.
    #[serde(rename = "FILE_DELETE_RESPONSE")]
    FileDeleteResponse(FileDeleteResponse),
    /// Unparseable or state-invalid traffic notice.
    #[serde(rename = "INVALID_PROTOCOL")]
    InvalidProtocol(InvalidProtocol),
}

impl Message {
    /// Returns the wire command name of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::HandshakeRequest(_) => "HANDSHAKE_REQUEST",
            Message::HandshakeResponse(_) => "HANDSHAKE_RESPONSE",
            Message::AuthChallenge(_) => "AUTH_CHALLENGE",
            Message::AuthResponse(_) => "AUTH_RESPONSE",
            Message::ConnectionRefused(_) => "CONNECTION_REFUSED",
            Message::FileCreateRequest(_) => "FILE_CREATE_REQUEST",
            Message::FileCreateResponse(_) => "FILE_CREATE_RESPONSE",
            Message::FileModifyRequest(_) => "FILE_MODIFY_REQUEST",
            Message::FileModifyResponse(_) => "FILE_MODIFY_RESPONSE",
            Message::FileBytesRequest(_) => "FILE_BYTES_REQUEST",
            Message::FileBytesResponse(_) => "FILE_BYTES_RESPONSE",
            Message::FileDeleteRequest(_) => "FILE_DELETE_REQUEST",
            Message::FileDeleteResponse(_) => "FILE_DELETE_RESPONSE",
            Message::InvalidProtocol(_) => "INVALID_PROTOCOL",
        }
    }

    /// Encodes the message to a JSON document.
    pub fn encode(&self) -> ProtoResult<String> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encode(e.to_string()))
    }

    /// Decodes a message from a JSON document.
    pub fn decode(document: &str) -> ProtoResult<Self> {
        serde_json::from_str(document).map_err(|e| ProtoError::Malformed(e.to_string()))
    }

    /// Builds an `INVALID_PROTOCOL` answer with a description.
    pub fn invalid_protocol(message: impl Into<String>) -> Self {
        Message::InvalidProtocol(InvalidProtocol {
            message: message.into(),
        })
    }
}

/// Identity announcement sent by the connection initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Fingerprint of the initiator's public key.
    pub fingerprint: String,
    /// Base64-encoded public key, used to seal the challenge.
    pub public_key: String,
    /// Name of the group the initiator wants to synchronize.
    pub group_name: String,
    /// Host the initiator accepts connections on.
    pub host: String,
    /// Port the initiator accepts connections on.
    pub port: u16,
}

/// Identity announcement sent back by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Fingerprint of the responder's public key.
    pub fingerprint: String,
    /// Base64-encoded public key, used to seal the challenge.
    pub public_key: String,
    /// Host the responder accepts connections on.
    pub host: String,
    /// Port the responder accepts connections on.
    pub port: u16,
}

/// An encrypted challenge secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    /// Base64-encoded sealed challenge payload.
    pub challenge: String,
}

/// The recovered secret proving possession of a private key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Lowercase hex rendering of the decrypted secret.
    pub secret: String,
}

/// Refusal of a connection before it becomes active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRefused {
    /// Human-readable refusal reason.
    pub message: String,
}

/// Proposal to create a file at a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreateRequest {
    /// Relative path inside the synchronized directory.
    pub path_name: String,
    /// Descriptor of the content the sender holds.
    pub file_descriptor: FileDescriptor,
}

/// Answer to a create proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreateResponse {
    /// Path from the request.
    pub path_name: String,
    /// Descriptor from the request.
    pub file_descriptor: FileDescriptor,
    /// Whether the receiver accepted and will request bytes.
    pub status: bool,
    /// Acceptance note or refusal reason.
    pub message: String,
}

impl FileCreateResponse {
    /// Builds an accepting response.
    pub fn accepted(path_name: impl Into<String>, file_descriptor: FileDescriptor) -> Self {
        Self {
            path_name: path_name.into(),
            file_descriptor,
            status: true,
            message: "file loader ready".into(),
        }
    }

    /// Builds a refusal carrying a machine-checkable reason string.
    pub fn refused(
        path_name: impl Into<String>,
        file_descriptor: FileDescriptor,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path_name: path_name.into(),
            file_descriptor,
            status: false,
            message: reason.into(),
        }
    }
}

/// Proposal to replace the content of an existing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileModifyRequest {
    /// Relative path inside the synchronized directory.
    pub path_name: String,
    /// Descriptor of the new content.
    pub file_descriptor: FileDescriptor,
}

/// Answer to a modify proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileModifyResponse {
    /// Path from the request.
    pub path_name: String,
    /// Descriptor from the request.
    pub file_descriptor: FileDescriptor,
    /// Whether the receiver accepted and will request bytes.
    pub status: bool,
    /// Acceptance note or refusal reason.
    pub message: String,
}

impl FileModifyResponse {
    /// Builds an accepting response.
    pub fn accepted(path_name: impl Into<String>, file_descriptor: FileDescriptor) -> Self {
        Self {
            path_name: path_name.into(),
            file_descriptor,
            status: true,
            message: "file loader ready".into(),
        }
    }

    /// Builds a refusal carrying a machine-checkable reason string.
    pub fn refused(
        path_name: impl Into<String>,
        file_descriptor: FileDescriptor,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path_name: path_name.into(),
            file_descriptor,
            status: false,
            message: reason.into(),
        }
    }
}

/// Request for a byte range of a file under transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBytesRequest {
    /// Descriptor negotiated for this transfer.
    pub file_descriptor: FileDescriptor,
    /// Path under transfer.
    pub path_name: String,
    /// Offset of the first requested byte.
    pub position: u64,
    /// Number of bytes requested.
    pub length: u64,
}

/// Byte range content for a transfer, or a failure for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBytesResponse {
    /// Descriptor negotiated for this transfer.
    pub file_descriptor: FileDescriptor,
    /// Path under transfer.
    pub path_name: String,
    /// Offset of the first byte carried.
    pub position: u64,
    /// Number of bytes carried.
    pub length: u64,
    /// Base64-encoded content; empty on failure.
    pub content: String,
    /// Whether the range was read successfully.
    pub status: bool,
    /// Success note or failure reason.
    pub message: String,
}

impl FileBytesResponse {
    /// Builds a successful response carrying `bytes`.
    pub fn success(request: &FileBytesRequest, bytes: &[u8]) -> Self {
        Self {
            file_descriptor: request.file_descriptor.clone(),
            path_name: request.path_name.clone(),
            position: request.position,
            length: bytes.len() as u64,
            content: BASE64.encode(bytes),
            status: true,
            message: "successful read".into(),
        }
    }

    /// Builds a failure response; the whole transfer must be aborted.
    pub fn failure(request: &FileBytesRequest, reason: impl Into<String>) -> Self {
        Self {
            file_descriptor: request.file_descriptor.clone(),
            path_name: request.path_name.clone(),
            position: request.position,
            length: 0,
            content: String::new(),
            status: false,
            message: reason.into(),
        }
    }

    /// Decodes the base64 content field into raw bytes.
    pub fn content_bytes(&self) -> ProtoResult<Vec<u8>> {
        BASE64
            .decode(&self.content)
            .map_err(|e| ProtoError::invalid_field("content", e.to_string()))
    }
}

/// Proposal to delete a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteRequest {
    /// Descriptor the sender believes the file currently has.
    pub file_descriptor: FileDescriptor,
    /// Relative path inside the synchronized directory.
    pub path_name: String,
}

/// Answer to a delete proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteResponse {
    /// Path from the request.
    pub path_name: String,
    /// Whether the file was deleted.
    pub status: bool,
    /// Acknowledgement or refusal reason.
    pub message: String,
}

impl FileDeleteResponse {
    /// Builds an acknowledging response.
    pub fn deleted(path_name: impl Into<String>) -> Self {
        Self {
            path_name: path_name.into(),
            status: true,
            message: "file deleted".into(),
        }
    }

    /// Builds a refusal carrying a machine-checkable reason string.
    pub fn refused(path_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path_name: path_name.into(),
            status: false,
            message: reason.into(),
        }
    }
}

/// Notice that a received document was unparseable or invalid for the
/// connection's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidProtocol {
    /// Description of what was wrong.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor() -> FileDescriptor {
        FileDescriptor::new("74b87337454200d4d33f80c4663dc5e5", 1700000000000, 4)
    }

    #[test]
    fn create_request_roundtrip() {
        let msg = Message::FileCreateRequest(FileCreateRequest {
            path_name: "a/b.txt".into(),
            file_descriptor: descriptor(),
        });

        let doc = msg.encode().unwrap();
        let decoded = Message::decode(&doc).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn command_field_on_the_wire() {
        let msg = Message::FileDeleteRequest(FileDeleteRequest {
            file_descriptor: descriptor(),
            path_name: "old.txt".into(),
        });

        let doc = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(value["command"], "FILE_DELETE_REQUEST");
        assert_eq!(value["pathName"], "old.txt");
        assert_eq!(value["fileDescriptor"]["fileSize"], 4);
    }

    #[test]
    fn bytes_response_content_roundtrip() {
        let request = FileBytesRequest {
            file_descriptor: descriptor(),
            path_name: "a/b.txt".into(),
            position: 0,
            length: 4,
        };

        let response = FileBytesResponse::success(&request, b"aaaa");
        assert!(response.status);
        assert_eq!(response.length, 4);
        assert_eq!(response.content_bytes().unwrap(), b"aaaa");
    }

    #[test]
    fn bytes_response_failure_has_no_content() {
        let request = FileBytesRequest {
            file_descriptor: descriptor(),
            path_name: "a/b.txt".into(),
            position: 0,
            length: 4,
        };

        let response = FileBytesResponse::failure(&request, "unsuccessful read");
        assert!(!response.status);
        assert!(response.content.is_empty());
        assert_eq!(response.message, "unsuccessful read");
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let result = Message::decode(r#"{"command":"MAKE_COFFEE"}"#);
        assert!(matches!(result, Err(ProtoError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_non_json() {
        let result = Message::decode("not json at all");
        assert!(matches!(result, Err(ProtoError::Malformed(_))));
    }

    #[test]
    fn refusal_constructors_set_status_false() {
        let response = FileCreateResponse::refused(
            "a/b.txt",
            descriptor(),
            "pathname already exists with matching content",
        );
        assert!(!response.status);
        assert_eq!(
            response.message,
            "pathname already exists with matching content"
        );

        let response = FileDeleteResponse::refused("a/b.txt", "pathname does not exist");
        assert!(!response.status);
    }

    #[test]
    fn handshake_request_wire_shape() {
        let msg = Message::HandshakeRequest(HandshakeRequest {
            fingerprint: "f1".into(),
            public_key: "cHVibGlja2V5".into(),
            group_name: "g1".into(),
            host: "127.0.0.1".into(),
            port: 8440,
        });

        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["command"], "HANDSHAKE_REQUEST");
        assert_eq!(value["groupName"], "g1");
        assert_eq!(value["publicKey"], "cHVibGlja2V5");
        assert_eq!(value["port"], 8440);
    }

    #[test]
    fn every_command_name_matches_variant() {
        let request = FileBytesRequest {
            file_descriptor: descriptor(),
            path_name: "x".into(),
            position: 0,
            length: 1,
        };
        let cases = vec![
            Message::invalid_protocol("bad"),
            Message::ConnectionRefused(ConnectionRefused {
                message: "not a member".into(),
            }),
            Message::AuthChallenge(AuthChallenge {
                challenge: "c2VjcmV0".into(),
            }),
            Message::AuthResponse(AuthResponse {
                secret: "deadbeef".into(),
            }),
            Message::FileBytesRequest(request.clone()),
            Message::FileBytesResponse(FileBytesResponse::success(&request, b"x")),
        ];

        for msg in cases {
            let doc = msg.encode().unwrap();
            let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
            assert_eq!(value["command"], msg.command());
            assert_eq!(Message::decode(&doc).unwrap(), msg);
        }
    }

    proptest! {
        #[test]
        fn file_messages_survive_the_wire(
            path in "[a-zA-Z0-9._/-]{1,40}",
            md5 in "[a-f0-9]{32}",
            last_modified in 0u64..=1u64 << 48,
            position in 0u64..1_000_000u64,
            content in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let descriptor = FileDescriptor::new(md5, last_modified, content.len() as u64);
            let request = FileBytesRequest {
                file_descriptor: descriptor.clone(),
                path_name: path.clone(),
                position,
                length: content.len() as u64,
            };

            let messages = vec![
                Message::FileCreateRequest(FileCreateRequest {
                    path_name: path.clone(),
                    file_descriptor: descriptor.clone(),
                }),
                Message::FileModifyRequest(FileModifyRequest {
                    path_name: path.clone(),
                    file_descriptor: descriptor.clone(),
                }),
                Message::FileDeleteRequest(FileDeleteRequest {
                    file_descriptor: descriptor,
                    path_name: path,
                }),
                Message::FileBytesRequest(request.clone()),
                Message::FileBytesResponse(FileBytesResponse::success(&request, &content)),
            ];

            for msg in messages {
                let doc = msg.encode().unwrap();
                let decoded = Message::decode(&doc).unwrap();
                if let Message::FileBytesResponse(resp) = &decoded {
                    prop_assert_eq!(resp.content_bytes().unwrap(), content.clone());
                }
                prop_assert_eq!(decoded, msg);
            }
        }
    }
}
