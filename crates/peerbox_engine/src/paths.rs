//! Safe sync path validation.

use std::fmt;
use std::path::{Path, PathBuf};

/// Why a proposed pathname was rejected.
///
/// A refusal is an expected outcome, answered in-protocol with a
/// `status:false` response; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRefusal {
    /// The pathname is empty.
    Empty,
    /// The pathname is absolute (or carries a drive prefix).
    Absolute,
    /// The pathname contains a `..` component.
    Traversal,
    /// The pathname contains an empty or `.` component.
    IllegalComponent,
    /// The pathname contains a NUL byte or a backslash.
    IllegalCharacter,
}

impl PathRefusal {
    /// Machine-checkable reason string carried in refusal responses.
    pub fn reason(&self) -> &'static str {
        match self {
            PathRefusal::Empty => "pathname is empty",
            PathRefusal::Absolute => "pathname is absolute",
            PathRefusal::Traversal => "pathname escapes the synchronized directory",
            PathRefusal::IllegalComponent => "pathname contains an empty or dot component",
            PathRefusal::IllegalCharacter => "pathname contains an illegal character",
        }
    }
}

impl fmt::Display for PathRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// A validated relative path inside a synchronized directory.
///
/// Always uses `/` as the separator, never begins with it, and contains
/// no `.`, `..`, or empty components. A `RelativePath` joined onto a sync
/// root cannot land outside that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    /// Validates a raw pathname from the wire or from a local event.
    pub fn parse(raw: &str) -> Result<Self, PathRefusal> {
        if raw.is_empty() {
            return Err(PathRefusal::Empty);
        }
        if raw.contains('\0') || raw.contains('\\') {
            return Err(PathRefusal::IllegalCharacter);
        }
        if raw.starts_with('/') {
            return Err(PathRefusal::Absolute);
        }
        // Windows drive prefixes arrive as "c:..." regardless of platform.
        if raw.as_bytes().get(1) == Some(&b':') {
            return Err(PathRefusal::Absolute);
        }
        for component in raw.split('/') {
            match component {
                "" | "." => return Err(PathRefusal::IllegalComponent),
                ".." => return Err(PathRefusal::Traversal),
                _ => {}
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// The validated pathname as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins this path onto a sync root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
