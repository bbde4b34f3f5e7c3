//! # Peerbox Engine
//!
//! The per-connection sync protocol engine: safe path validation, a staged
//! file store, transfer state tracking, and the message-level state machine
//! for create/modify/delete/byte-range negotiation.
//!
//! This crate provides:
//! - `RelativePath`: validated safe paths inside a synchronized directory
//! - `FileStore` / `LocalStore`: staged writes with atomic promotion
//! - `Transfer`: per-path transfer state with exact range tiling
//! - `SyncEngine`: `handle_message` over an authenticated connection
//! - `SyncEvent`: deduplicated local-change events
//!
//! ## Key Invariants
//!
//! - No byte ever lands outside the synchronized directory
//! - Staged content is promoted only after its digest matches the
//!   negotiated descriptor; a mismatch discards the staging file
//! - Bytes written to a transfer never exceed the negotiated size
//! - Expected refusals (unsafe path, matching content, stale descriptor)
//!   are `status:false` responses, never errors

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod events;
mod paths;
mod store;
mod transfer;

pub use config::{EngineConfig, DEFAULT_CHUNK_SIZE};
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use events::{SyncEvent, SyncEventKind};
pub use paths::{PathRefusal, RelativePath};
pub use store::{md5_hex, FileStore, LocalStore, StagingTicket, STAGING_DIR};
pub use transfer::{Transfer, TransferStatus};
