//! Staged file storage under a sync root.

use crate::error::{EngineError, EngineResult};
use crate::paths::RelativePath;
use peerbox_proto::FileDescriptor;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

/// Directory under the sync root holding in-progress staged content.
///
/// Never synchronized itself; promotion moves files out of it.
pub const STAGING_DIR: &str = ".peerbox.staging";

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// One staging allocation, unique within the process.
///
/// Several connections may transfer the same path at once; each holds
/// its own ticket, so their staged bytes never share a file and a
/// promotion only ever moves content this transfer verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingTicket(u64);

impl StagingTicket {
    /// Issues a fresh ticket.
    pub fn issue() -> Self {
        Self(NEXT_TICKET.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for StagingTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lowercase hex MD5 digest of `bytes`, as carried in file descriptors.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Filesystem interface the protocol engine runs against.
///
/// Staged writes are invisible until `promote`; a transfer that aborts
/// leaves no trace at the final path.
pub trait FileStore: Send + Sync {
    /// Descriptor of the file currently at `path`, if any.
    fn descriptor_of(&self, path: &RelativePath) -> EngineResult<Option<FileDescriptor>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &RelativePath) -> bool;

    /// Returns true if a file at `path` already has `descriptor`'s content.
    fn exists_matching(&self, path: &RelativePath, descriptor: &FileDescriptor)
        -> EngineResult<bool>;

    /// Allocates a staging file of `size` bytes for an accepted transfer.
    fn open_staging(&self, path: &RelativePath, ticket: StagingTicket, size: u64)
        -> EngineResult<()>;

    /// Writes `bytes` into the staging file at `position`.
    fn write_chunk(
        &self,
        path: &RelativePath,
        ticket: StagingTicket,
        position: u64,
        bytes: &[u8],
    ) -> EngineResult<()>;

    /// Reads `length` bytes at `position` from the visible file at `path`.
    fn read_chunk(&self, path: &RelativePath, position: u64, length: u64)
        -> EngineResult<Vec<u8>>;

    /// Digest of the staged content for `path`.
    fn staged_digest(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<String>;

    /// Atomically moves the staged content to its final visible path.
    fn promote(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<()>;

    /// Drops the staged content for `path`, if any.
    fn discard(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<()>;

    /// Deletes the visible file at `path`.
    fn delete(&self, path: &RelativePath) -> EngineResult<()>;
}

/// `FileStore` over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Creates a store rooted at `root`. The directory must exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sync root this store serves.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn final_path(&self, path: &RelativePath) -> PathBuf {
        path.resolve(&self.root)
    }

    fn ticket_dir(&self, ticket: StagingTicket) -> PathBuf {
        self.root.join(STAGING_DIR).join(ticket.to_string())
    }

    fn staging_path(&self, path: &RelativePath, ticket: StagingTicket) -> PathBuf {
        path.resolve(&self.ticket_dir(ticket))
    }
}

fn ensure_parent(target: &Path, context: &RelativePath) -> EngineResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::store(context.as_str(), e))?;
    }
    Ok(())
}

impl FileStore for LocalStore {
    fn descriptor_of(&self, path: &RelativePath) -> EngineResult<Option<FileDescriptor>> {
        let target = self.final_path(path);
        if !target.is_file() {
            return Ok(None);
        }
        let content =
            fs::read(&target).map_err(|e| EngineError::store(path.as_str(), e))?;
        let metadata =
            fs::metadata(&target).map_err(|e| EngineError::store(path.as_str(), e))?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(Some(FileDescriptor::new(
            md5_hex(&content),
            last_modified,
            content.len() as u64,
        )))
    }

    fn exists(&self, path: &RelativePath) -> bool {
        self.final_path(path).is_file()
    }

    fn exists_matching(
        &self,
        path: &RelativePath,
        descriptor: &FileDescriptor,
    ) -> EngineResult<bool> {
        match self.descriptor_of(path)? {
            Some(local) => Ok(local.same_content(descriptor)),
            None => Ok(false),
        }
    }

    fn open_staging(
        &self,
        path: &RelativePath,
        ticket: StagingTicket,
        size: u64,
    ) -> EngineResult<()> {
        let staging = self.staging_path(path, ticket);
        ensure_parent(&staging, path)?;
        let file = File::create(&staging).map_err(|e| EngineError::store(path.as_str(), e))?;
        file.set_len(size)
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        Ok(())
    }

    fn write_chunk(
        &self,
        path: &RelativePath,
        ticket: StagingTicket,
        position: u64,
        bytes: &[u8],
    ) -> EngineResult<()> {
        let staging = self.staging_path(path, ticket);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&staging)
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        file.write_all(bytes)
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        Ok(())
    }

    fn read_chunk(
        &self,
        path: &RelativePath,
        position: u64,
        length: u64,
    ) -> EngineResult<Vec<u8>> {
        let target = self.final_path(path);
        let mut file = File::open(&target).map_err(|e| EngineError::store(path.as_str(), e))?;
        let size = file
            .metadata()
            .map_err(|e| EngineError::store(path.as_str(), e))?
            .len();
        if position.checked_add(length).map_or(true, |end| end > size) {
            return Err(EngineError::store(
                path.as_str(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "requested range is out of bounds",
                ),
            ));
        }
        file.seek(SeekFrom::Start(position))
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| EngineError::store(path.as_str(), e))?;
        Ok(buffer)
    }

    fn staged_digest(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<String> {
        let staging = self.staging_path(path, ticket);
        let content = fs::read(&staging).map_err(|e| EngineError::store(path.as_str(), e))?;
        Ok(md5_hex(&content))
    }

    fn promote(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<()> {
        let staging = self.staging_path(path, ticket);
        let target = self.final_path(path);
        ensure_parent(&target, path)?;
        fs::rename(&staging, &target).map_err(|e| EngineError::store(path.as_str(), e))?;
        let _ = fs::remove_dir_all(self.ticket_dir(ticket));
        Ok(())
    }

    fn discard(&self, path: &RelativePath, ticket: StagingTicket) -> EngineResult<()> {
        match fs::remove_dir_all(self.ticket_dir(ticket)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::store(path.as_str(), e)),
        }
    }

    fn delete(&self, path: &RelativePath) -> EngineResult<()> {
        let target = self.final_path(path);
        fs::remove_file(&target).map_err(|e| EngineError::store(path.as_str(), e))
    }
}
