//! Attribute translation.
//!
//! Real nodes mirror their backing object's metadata, except for the link
//! count and block size which are virtualized. Scaffold nodes get a fixed
//! record owned by the mounting identity.

use std::ffi::{OsStr, OsString};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs;

use super::error::{VfsError, VfsResult};
use super::node::{Node, NodeKind};
use super::types::{Credentials, FileAttr, FileType};

/// Block size advertised for every node.
///
/// This is what the FUSE protocol layer can report on each platform, not the
/// geometry of the backing storage.
#[cfg(target_os = "macos")]
pub const BLOCK_SIZE: u32 = 65536;
#[cfg(not(target_os = "macos"))]
pub const BLOCK_SIZE: u32 = 4096;

/// Permission bits of every scaffold directory.
pub const SCAFFOLD_PERM: u32 = 0o555;

/// Link count reported for directories, regardless of subdirectories.
pub const DIR_NLINK: u32 = 2;

/// Computes the attribute records and extended attributes exposed for nodes.
#[derive(Debug, Clone)]
pub struct AttributeTranslator {
    owner: Credentials,
    mount_time: SystemTime,
    xattrs: bool,
}

impl AttributeTranslator {
    /// Create a translator for a mount owned by `owner`.
    pub fn new(owner: Credentials, xattrs: bool) -> Self {
        Self {
            owner,
            mount_time: SystemTime::now(),
            xattrs,
        }
    }

    /// Whether extended attributes are proxied to backing objects.
    pub fn xattrs_enabled(&self) -> bool {
        self.xattrs
    }

    /// Identity that owns scaffold nodes.
    pub fn owner(&self) -> Credentials {
        self.owner
    }

    /// Attributes of `node`, reading backing metadata for real nodes.
    pub async fn attributes_of(&self, node: &Node) -> VfsResult<FileAttr> {
        match node.kind() {
            NodeKind::Scaffold => Ok(self.scaffold_attr(node.ino())),
            NodeKind::Real { backing, .. } => {
                let meta = fs::symlink_metadata(backing).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        VfsError::not_found(node.path().display().to_string())
                    } else {
                        VfsError::Io(e)
                    }
                })?;
                Ok(Self::metadata_to_attr(node.ino(), &meta))
            }
        }
    }

    /// Fixed record for a scaffold directory.
    pub fn scaffold_attr(&self, ino: u64) -> FileAttr {
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            kind: FileType::Directory,
            perm: SCAFFOLD_PERM,
            nlink: DIR_NLINK,
            uid: self.owner.uid,
            gid: self.owner.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            atime: self.mount_time,
            mtime: self.mount_time,
            ctime: self.mount_time,
            crtime: self.mount_time,
        }
    }

    /// Convert backing metadata to the virtualized record.
    pub fn metadata_to_attr(ino: u64, meta: &std::fs::Metadata) -> FileAttr {
        let kind = FileType::from(meta.file_type());
        let mtime = system_time(meta.mtime(), meta.mtime_nsec());

        FileAttr {
            ino,
            size: meta.size(),
            blocks: meta.blocks(),
            kind,
            perm: meta.mode() & 0o7777,
            nlink: if kind.is_dir() { DIR_NLINK } else { 1 },
            uid: meta.uid(),
            gid: meta.gid(),
            // fuser carries a 32-bit rdev.
            rdev: u32::try_from(meta.rdev()).unwrap_or(u32::MAX),
            blksize: BLOCK_SIZE,
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime,
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            crtime: meta.created().unwrap_or(mtime),
        }
    }

    /// Names of the extended attributes on `node`.
    pub async fn listxattr(&self, node: &Node) -> VfsResult<Vec<OsString>> {
        let backing = match node.kind() {
            NodeKind::Scaffold => return Ok(Vec::new()),
            NodeKind::Real { backing, .. } => backing.clone(),
        };
        if !self.xattrs {
            return disabled_listxattr(node.path());
        }

        blocking(move || xattr::list(&backing).map(|names| names.collect())).await
    }

    /// Value of the extended attribute `name` on `node`.
    pub async fn getxattr(&self, node: &Node, name: &OsStr) -> VfsResult<Vec<u8>> {
        let backing = match node.kind() {
            NodeKind::Scaffold => {
                return Err(VfsError::attribute_not_found(name.to_string_lossy()));
            }
            NodeKind::Real { backing, .. } => backing.clone(),
        };
        if !self.xattrs {
            return Err(VfsError::unsupported(format!(
                "getxattr on {}",
                node.path().display()
            )));
        }

        let attr_name = name.to_os_string();
        let value = blocking(move || xattr::get(&backing, &attr_name)).await?;
        value.ok_or_else(|| VfsError::attribute_not_found(name.to_string_lossy()))
    }

    /// Target of a symbolic link node.
    pub async fn readlink(&self, node: &Node) -> VfsResult<PathBuf> {
        match node.kind() {
            NodeKind::Scaffold => Err(VfsError::not_a_symlink(node.path().display().to_string())),
            NodeKind::Real { backing, .. } => fs::read_link(backing).await.map_err(|e| {
                if e.raw_os_error() == Some(libc::EINVAL) {
                    VfsError::not_a_symlink(node.path().display().to_string())
                } else {
                    VfsError::Io(e)
                }
            }),
        }
    }
}

// Darwin reports an empty list when xattrs are disabled; Linux fails the call.
#[cfg(target_os = "macos")]
fn disabled_listxattr(_path: &Path) -> VfsResult<Vec<OsString>> {
    Ok(Vec::new())
}

#[cfg(not(target_os = "macos"))]
fn disabled_listxattr(path: &Path) -> VfsResult<Vec<OsString>> {
    Err(VfsError::unsupported(format!("listxattr on {}", path.display())))
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.max(0) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .map(|t| t + nanos)
            .unwrap_or(UNIX_EPOCH)
    }
}

/// Run a blocking host call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> VfsResult<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))?
        .map_err(VfsError::from)
}
