//! VFS operations trait.
//!
//! The request surface a transport drives. Operations address nodes by
//! inode number and open state by handle id, matching what a FUSE session
//! hands the filesystem.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use super::VfsResult;
use super::types::{AccessMode, Credentials, DirEntry, FileAttr, OpenFlags, StatFs};

/// Read-only filesystem operations.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Name resolution and attributes
    // ========================================================================

    /// Resolve `name` inside directory `parent`.
    ///
    /// Requires search permission on `parent` for `creds`.
    async fn lookup(&self, parent: u64, name: &OsStr, creds: &Credentials) -> VfsResult<FileAttr>;

    /// Get node attributes.
    async fn getattr(&self, ino: u64) -> VfsResult<FileAttr>;

    /// Read symbolic link target.
    async fn readlink(&self, ino: u64) -> VfsResult<PathBuf>;

    /// Check `mode` for `creds` on the node and search permission on every
    /// directory above it.
    async fn access(&self, ino: u64, mode: AccessMode, creds: &Credentials) -> VfsResult<()>;

    // ========================================================================
    // Handles
    // ========================================================================

    /// Open a node for reading. Returns a handle id.
    async fn open(&self, ino: u64, flags: OpenFlags, creds: &Credentials) -> VfsResult<u64>;

    /// Open a directory for listing. Returns a handle id.
    async fn opendir(&self, ino: u64, creds: &Credentials) -> VfsResult<u64>;

    /// Read up to `size` bytes at `offset`. Returns fewer bytes at EOF.
    async fn read(&self, fh: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Directory entries from `offset` onwards, sorted by name.
    async fn readdir(&self, fh: u64, offset: u64) -> VfsResult<Vec<DirEntry>>;

    /// Close a handle.
    async fn release(&self, fh: u64) -> VfsResult<()>;

    // ========================================================================
    // Extended attributes
    // ========================================================================

    /// Get an extended attribute value.
    async fn getxattr(&self, ino: u64, name: &OsStr) -> VfsResult<Vec<u8>>;

    /// List extended attribute names.
    async fn listxattr(&self, ino: u64) -> VfsResult<Vec<OsString>>;

    // ========================================================================
    // Filesystem info
    // ========================================================================

    /// Get filesystem statistics.
    async fn statfs(&self, ino: u64) -> VfsResult<StatFs>;
}
