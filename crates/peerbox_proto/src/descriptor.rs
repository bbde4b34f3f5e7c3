//! File content descriptors.

use serde::{Deserialize, Serialize};

/// Identifies one specific version of a file's content.
///
/// Two files with equal descriptors are treated as identical for sync
/// purposes; the digest is authoritative, the timestamp is advisory
/// (last writer / content hash wins).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Lowercase hex MD5 digest of the full file content.
    pub md5: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub last_modified: u64,
    /// Content length in bytes.
    pub file_size: u64,
}

impl FileDescriptor {
    /// Creates a new descriptor.
    pub fn new(md5: impl Into<String>, last_modified: u64, file_size: u64) -> Self {
        Self {
            md5: md5.into(),
            last_modified,
            file_size,
        }
    }

    /// Returns true if the content (digest and size) matches `other`.
    ///
    /// Timestamps are ignored; a touch without a content change does not
    /// make two descriptors differ.
    pub fn same_content(&self, other: &FileDescriptor) -> bool {
        self.md5 == other.md5 && self.file_size == other.file_size
    }

    /// Returns true if `other` is strictly newer by modification time.
    pub fn older_than(&self, other: &FileDescriptor) -> bool {
        self.last_modified < other.last_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_content_equality() {
        let a = FileDescriptor::new("abc", 1000, 3);
        let b = FileDescriptor::new("abc", 2000, 3);
        let c = FileDescriptor::new("def", 1000, 3);

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
        assert!(a.older_than(&b));
        assert!(!b.older_than(&a));
    }

    #[test]
    fn descriptor_wire_field_names() {
        let d = FileDescriptor::new("abc", 12345, 42);
        let json = serde_json::to_value(&d).unwrap();

        assert_eq!(json["md5"], "abc");
        assert_eq!(json["lastModified"], 12345);
        assert_eq!(json["fileSize"], 42);
    }
}
