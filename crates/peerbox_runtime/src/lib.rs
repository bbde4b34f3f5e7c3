//! # Peerbox Runtime
//!
//! The concurrency substrate for Peerbox: a deduplicating ordered blocking
//! event queue and a self-healing task supervisor.
//!
//! This crate provides:
//! - `EventQueue`: FIFO of distinct items with a blocking `take`
//! - `TaskSupervisor`: worker pool that resubmits tasks that die without
//!   being cancelled first
//! - `CancelToken`: cooperative interruption for blocking loops
//!
//! ## Key Invariants
//!
//! - An event is present in the queue at most once at a time
//! - The queue's internal lock is released while a taker is parked
//! - Cancellation is recorded before the interrupt is issued, so a task
//!   finishing naturally at the same instant is never resubmitted

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod queue;
mod supervisor;

pub use queue::EventQueue;
pub use supervisor::{CancelToken, SupervisedTask, TaskHandle, TaskSupervisor};
