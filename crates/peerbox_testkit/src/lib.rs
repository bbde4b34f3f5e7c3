//! # Peerbox Testkit
//!
//! Test utilities for Peerbox.
//!
//! This crate provides:
//! - Test fixtures: throwaway nodes with temp sync roots, wired over
//!   in-memory transports
//! - Property-based test generators using proptest
//! - A harness for end-to-end synchronization scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peerbox_testkit::prelude::*;
//!
//! #[test]
//! fn file_appears_on_the_other_node() {
//!     let harness = SyncHarness::new();
//!     harness.create_on_a("notes.txt", b"hello");
//!     harness.wait_for_file_on_b("notes.txt", b"hello");
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
