//! Local filesystem change events.

use crate::paths::RelativePath;
use peerbox_proto::FileDescriptor;
use std::hash::{Hash, Hasher};

/// What happened to a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    /// A file appeared.
    Create,
    /// An existing file's content changed.
    Modify,
    /// A file disappeared.
    Delete,
}

/// A pending synchronization of one local change.
///
/// Queue identity is `(kind, path)` only: two events for the same path
/// and kind share one queue slot even when their descriptors differ.
/// The queue refreshes the slot with the newer event on a duplicate add,
/// so a file touched twice before dispatch is synced once, with the
/// descriptor of its latest content.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    /// What happened.
    pub kind: SyncEventKind,
    /// Which file it happened to.
    pub path: RelativePath,
    /// Descriptor of the content at event time. Delete events carry the
    /// descriptor the file had before removal.
    pub descriptor: FileDescriptor,
}

impl SyncEvent {
    /// Creates an event.
    pub fn new(kind: SyncEventKind, path: RelativePath, descriptor: FileDescriptor) -> Self {
        Self {
            kind,
            path,
            descriptor,
        }
    }
}

impl PartialEq for SyncEvent {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.path == other.path
    }
}

impl Eq for SyncEvent {}

impl Hash for SyncEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerbox_runtime::EventQueue;

    fn event(kind: SyncEventKind, raw: &str, md5: &str) -> SyncEvent {
        SyncEvent::new(
            kind,
            RelativePath::parse(raw).unwrap(),
            FileDescriptor::new(md5, 0, 1),
        )
    }

    #[test]
    fn identity_ignores_descriptor() {
        let a = event(SyncEventKind::Modify, "a.txt", "aaa");
        let b = event(SyncEventKind::Modify, "a.txt", "bbb");
        let c = event(SyncEventKind::Delete, "a.txt", "aaa");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn repeated_modify_queues_once() {
        let queue = EventQueue::new();
        assert!(queue.add(event(SyncEventKind::Modify, "a.txt", "v1")));
        assert!(!queue.add(event(SyncEventKind::Modify, "a.txt", "v2")));
        assert!(queue.add(event(SyncEventKind::Delete, "a.txt", "v2")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn repeated_modify_dispatches_the_latest_descriptor() {
        // A file touched twice before dispatch must go out with the
        // digest of its current content, not the first observation's.
        let queue = EventQueue::new();
        queue.add(event(SyncEventKind::Modify, "a.txt", "v1"));
        queue.add(event(SyncEventKind::Modify, "a.txt", "v2"));

        let dispatched = queue.take();
        assert_eq!(dispatched.descriptor.md5, "v2");
        assert!(queue.is_empty());
    }
}
