//! The message-level sync protocol state machine.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{SyncEvent, SyncEventKind};
use crate::paths::RelativePath;
use crate::store::{FileStore, StagingTicket};
use crate::transfer::Transfer;
use peerbox_proto::{
    FileBytesRequest, FileBytesResponse, FileCreateRequest, FileCreateResponse,
    FileDeleteRequest, FileDeleteResponse, FileDescriptor, FileModifyRequest,
    FileModifyResponse, Message, MAX_CHUNK_SIZE,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of evaluating a create/modify proposal.
enum Acceptance {
    /// Accepted; follow-up messages (the first byte-range request, or
    /// nothing for an empty file) to send after the acceptance.
    Ready(Vec<Message>),
    /// Refused with a machine-checkable reason.
    Refused(String),
}

/// Per-connection sync protocol engine.
///
/// Runs over an authenticated connection: every inbound message maps to
/// zero or more outbound messages. Refusals and invalid-protocol notices
/// are answered in-band; only storage and integrity failures surface as
/// errors, and neither crashes the connection.
pub struct SyncEngine {
    store: Arc<dyn FileStore>,
    config: EngineConfig,
    inbound: HashMap<String, Transfer>,
}

impl SyncEngine {
    /// Creates an engine over `store`.
    pub fn new(store: Arc<dyn FileStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            inbound: HashMap::new(),
        }
    }

    /// Number of in-flight inbound transfers.
    pub fn active_transfers(&self) -> usize {
        self.inbound.len()
    }

    /// Builds the wire proposal for a local change event.
    pub fn propose(&self, event: &SyncEvent) -> Message {
        let path_name = event.path.as_str().to_string();
        let file_descriptor = event.descriptor.clone();
        match event.kind {
            SyncEventKind::Create => Message::FileCreateRequest(FileCreateRequest {
                path_name,
                file_descriptor,
            }),
            SyncEventKind::Modify => Message::FileModifyRequest(FileModifyRequest {
                path_name,
                file_descriptor,
            }),
            SyncEventKind::Delete => Message::FileDeleteRequest(FileDeleteRequest {
                file_descriptor,
                path_name,
            }),
        }
    }

    /// Processes one inbound message, returning the messages to send back.
    pub fn handle_message(&mut self, message: Message) -> EngineResult<Vec<Message>> {
        match message {
            Message::FileCreateRequest(req) => self.handle_create(req),
            Message::FileModifyRequest(req) => self.handle_modify(req),
            Message::FileBytesRequest(req) => {
                let response = self.serve_bytes(&req);
                Ok(vec![Message::FileBytesResponse(response)])
            }
            Message::FileBytesResponse(resp) => self.handle_bytes_response(resp),
            Message::FileDeleteRequest(req) => Ok(vec![self.handle_delete(req)]),
            Message::FileCreateResponse(resp) => {
                if !resp.status {
                    debug!(path = %resp.path_name, reason = %resp.message, "create refused by peer");
                }
                Ok(Vec::new())
            }
            Message::FileModifyResponse(resp) => {
                if !resp.status {
                    debug!(path = %resp.path_name, reason = %resp.message, "modify refused by peer");
                }
                Ok(Vec::new())
            }
            Message::FileDeleteResponse(resp) => {
                if !resp.status {
                    debug!(path = %resp.path_name, reason = %resp.message, "delete refused by peer");
                }
                Ok(Vec::new())
            }
            Message::InvalidProtocol(notice) => {
                warn!(reason = %notice.message, "peer reported invalid protocol");
                Ok(Vec::new())
            }
            Message::HandshakeRequest(_)
            | Message::HandshakeResponse(_)
            | Message::AuthChallenge(_)
            | Message::AuthResponse(_)
            | Message::ConnectionRefused(_) => Ok(vec![Message::invalid_protocol(
                "authentication message on an active connection",
            )]),
        }
    }

    /// Aborts every transfer with no progress inside the stall timeout;
    /// returns the affected paths.
    pub fn abort_stalled(&mut self) -> Vec<String> {
        let stalled: Vec<String> = self
            .inbound
            .iter()
            .filter(|(_, transfer)| transfer.stalled(self.config.stall_timeout))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stalled {
            warn!(path = %key, "transfer stalled, discarding staged content");
            self.abort_transfer(key);
        }
        stalled
    }

    fn handle_create(&mut self, req: FileCreateRequest) -> EngineResult<Vec<Message>> {
        match self.evaluate_proposal(&req.path_name, &req.file_descriptor, false)? {
            Acceptance::Ready(followups) => {
                let mut out = vec![Message::FileCreateResponse(FileCreateResponse::accepted(
                    req.path_name,
                    req.file_descriptor,
                ))];
                out.extend(followups);
                Ok(out)
            }
            Acceptance::Refused(reason) => Ok(vec![Message::FileCreateResponse(
                FileCreateResponse::refused(req.path_name, req.file_descriptor, reason),
            )]),
        }
    }

    fn handle_modify(&mut self, req: FileModifyRequest) -> EngineResult<Vec<Message>> {
        match self.evaluate_proposal(&req.path_name, &req.file_descriptor, true)? {
            Acceptance::Ready(followups) => {
                let mut out = vec![Message::FileModifyResponse(FileModifyResponse::accepted(
                    req.path_name,
                    req.file_descriptor,
                ))];
                out.extend(followups);
                Ok(out)
            }
            Acceptance::Refused(reason) => Ok(vec![Message::FileModifyResponse(
                FileModifyResponse::refused(req.path_name, req.file_descriptor, reason),
            )]),
        }
    }

    /// Shared validation for create/modify, in order: safe path, matching
    /// content dedup, modify-requires-existing, staging allocation.
    fn evaluate_proposal(
        &mut self,
        path_name: &str,
        descriptor: &FileDescriptor,
        require_existing: bool,
    ) -> EngineResult<Acceptance> {
        let path = match RelativePath::parse(path_name) {
            Ok(path) => path,
            Err(refusal) => return Ok(Acceptance::Refused(refusal.reason().to_string())),
        };

        match self.store.exists_matching(&path, descriptor) {
            Ok(true) => {
                return Ok(Acceptance::Refused(
                    "pathname already exists with matching content".to_string(),
                ))
            }
            Ok(false) => {}
            Err(e) => {
                warn!(path = %path, error = %e, "unable to inspect local file");
                return Ok(Acceptance::Refused("unable to inspect local file".to_string()));
            }
        }

        if require_existing && !self.store.exists(&path) {
            return Ok(Acceptance::Refused("pathname does not exist".to_string()));
        }

        // A re-proposal supersedes any transfer still filling this path.
        self.abort_transfer(path.as_str());

        let ticket = StagingTicket::issue();
        if let Err(e) = self.store.open_staging(&path, ticket, descriptor.file_size) {
            warn!(path = %path, error = %e, "unable to allocate staging file");
            return Ok(Acceptance::Refused(
                "unable to allocate file loader".to_string(),
            ));
        }

        let mut transfer = Transfer::new(path.clone(), descriptor.clone(), ticket);
        transfer.begin();

        if transfer.is_finished() {
            // Empty file: nothing to request, verify and promote now.
            self.finalize(transfer)?;
            return Ok(Acceptance::Ready(Vec::new()));
        }

        let followups = match transfer.next_range(self.config.chunk_size) {
            Some((position, length)) => vec![Message::FileBytesRequest(FileBytesRequest {
                file_descriptor: descriptor.clone(),
                path_name: path.as_str().to_string(),
                position,
                length,
            })],
            None => Vec::new(),
        };
        self.inbound.insert(path.as_str().to_string(), transfer);
        Ok(Acceptance::Ready(followups))
    }

    fn handle_bytes_response(&mut self, resp: FileBytesResponse) -> EngineResult<Vec<Message>> {
        let (path, ticket, position, length) = match self.inbound.get(&resp.path_name) {
            Some(transfer) => match transfer.next_range(self.config.chunk_size) {
                Some((position, length)) => {
                    (transfer.path().clone(), transfer.ticket(), position, length)
                }
                None => {
                    self.abort_transfer(&resp.path_name);
                    return Ok(vec![Message::invalid_protocol(format!(
                        "transfer for {} has no outstanding range",
                        resp.path_name
                    ))]);
                }
            },
            None => {
                return Ok(vec![Message::invalid_protocol(format!(
                    "no transfer in progress for {}",
                    resp.path_name
                ))])
            }
        };

        if !resp.status {
            warn!(path = %resp.path_name, reason = %resp.message, "peer failed a byte-range read, aborting transfer");
            self.abort_transfer(&resp.path_name);
            return Ok(Vec::new());
        }

        let bytes = match resp.content_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.abort_transfer(&resp.path_name);
                return Ok(vec![Message::invalid_protocol(format!(
                    "undecodable content for {}: {}",
                    resp.path_name, e
                ))]);
            }
        };

        if resp.position != position || bytes.len() as u64 != length {
            self.abort_transfer(&resp.path_name);
            return Ok(vec![Message::invalid_protocol(format!(
                "byte range does not match the requested range for {}",
                resp.path_name
            ))]);
        }

        if let Err(e) = self.store.write_chunk(&path, ticket, position, &bytes) {
            self.abort_transfer(&resp.path_name);
            return Err(e);
        }
        if let Some(transfer) = self.inbound.get_mut(&resp.path_name) {
            transfer.record_chunk(length);
        }

        let finished = self
            .inbound
            .get(&resp.path_name)
            .is_some_and(Transfer::is_finished);
        if finished {
            if let Some(transfer) = self.inbound.remove(&resp.path_name) {
                self.finalize(transfer)?;
            }
            return Ok(Vec::new());
        }

        let next = self
            .inbound
            .get(&resp.path_name)
            .and_then(|transfer| transfer.next_range(self.config.chunk_size));
        Ok(match next {
            Some((position, length)) => vec![Message::FileBytesRequest(FileBytesRequest {
                file_descriptor: resp.file_descriptor,
                path_name: resp.path_name,
                position,
                length,
            })],
            None => Vec::new(),
        })
    }

    /// Verifies the staged digest and promotes or discards.
    fn finalize(&mut self, mut transfer: Transfer) -> EngineResult<()> {
        let path = transfer.path().clone();
        let ticket = transfer.ticket();
        let expected = transfer.descriptor().md5.clone();

        let actual = match self.store.staged_digest(&path, ticket) {
            Ok(digest) => digest,
            Err(e) => {
                transfer.abort();
                let _ = self.store.discard(&path, ticket);
                return Err(e);
            }
        };

        if actual == expected {
            if let Err(e) = self.store.promote(&path, ticket) {
                transfer.abort();
                let _ = self.store.discard(&path, ticket);
                return Err(e);
            }
            transfer.complete();
            info!(path = %path, "transfer complete");
            Ok(())
        } else {
            transfer.abort();
            let _ = self.store.discard(&path, ticket);
            error!(path = %path, %expected, %actual, "assembled content failed digest check");
            Err(EngineError::Integrity {
                path: path.as_str().to_string(),
                expected,
                actual,
            })
        }
    }

    fn abort_transfer(&mut self, key: &str) {
        if let Some(mut transfer) = self.inbound.remove(key) {
            transfer.abort();
            if let Err(e) = self.store.discard(transfer.path(), transfer.ticket()) {
                warn!(path = %key, error = %e, "unable to discard staged content");
            }
        }
    }

    /// Answers a byte-range request against the visible file at the path.
    fn serve_bytes(&self, req: &FileBytesRequest) -> FileBytesResponse {
        let path = match RelativePath::parse(&req.path_name) {
            Ok(path) => path,
            Err(refusal) => return FileBytesResponse::failure(req, refusal.reason()),
        };
        if req.length == 0 {
            return FileBytesResponse::failure(req, "requested length is zero");
        }
        if req.length > MAX_CHUNK_SIZE {
            return FileBytesResponse::failure(
                req,
                "requested length exceeds the maximum chunk size",
            );
        }
        match self.store.read_chunk(&path, req.position, req.length) {
            Ok(bytes) => FileBytesResponse::success(req, &bytes),
            Err(e) => {
                warn!(path = %path, error = %e, "byte-range read failed");
                FileBytesResponse::failure(req, "unsuccessful read")
            }
        }
    }

    fn handle_delete(&mut self, req: FileDeleteRequest) -> Message {
        let path = match RelativePath::parse(&req.path_name) {
            Ok(path) => path,
            Err(refusal) => {
                return Message::FileDeleteResponse(FileDeleteResponse::refused(
                    req.path_name,
                    refusal.reason(),
                ))
            }
        };

        // A delete supersedes any transfer still filling this path.
        self.abort_transfer(&req.path_name);

        let response = match self.store.descriptor_of(&path) {
            Ok(None) => FileDeleteResponse::refused(&req.path_name, "pathname does not exist"),
            Ok(Some(local)) if !local.same_content(&req.file_descriptor) => {
                FileDeleteResponse::refused(&req.path_name, "file descriptor does not match")
            }
            Ok(Some(_)) => match self.store.delete(&path) {
                Ok(()) => FileDeleteResponse::deleted(&req.path_name),
                Err(e) => {
                    warn!(path = %path, error = %e, "delete failed");
                    FileDeleteResponse::refused(&req.path_name, "unable to delete file")
                }
            },
            Err(e) => {
                warn!(path = %path, error = %e, "unable to inspect local file");
                FileDeleteResponse::refused(&req.path_name, "unable to inspect local file")
            }
        };
        Message::FileDeleteResponse(response)
    }
}
