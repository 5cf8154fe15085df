//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No mapping covers the path and no backing entry exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// A data read was requested through a directory handle.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A directory listing was requested through a file handle.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Named extended attribute does not exist on the node.
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    /// Extended attributes are disabled for this mount.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Write access requested on a read-only tree.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Handle id is not open.
    #[error("bad handle: {0}")]
    BadHandle(u64),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A mapping failed validation.
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backing filesystem call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an AttributeNotFound error.
    pub fn attribute_not_found(name: impl Into<String>) -> Self {
        Self::AttributeNotFound(name.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotASymlink error.
    pub fn not_a_symlink(path: impl Into<String>) -> Self {
        Self::NotASymlink(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidMapping error.
    pub fn invalid_mapping(msg: impl Into<String>) -> Self {
        Self::InvalidMapping(msg.into())
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// The errno a FUSE transport should reply with.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => libc::ENOENT,
            VfsError::IsADirectory(_) => libc::EISDIR,
            VfsError::NotADirectory(_) => libc::ENOTDIR,
            VfsError::AttributeNotFound(_) => missing_xattr_errno(),
            VfsError::Unsupported(_) => unsupported_xattr_errno(),
            VfsError::PermissionDenied(_) => libc::EACCES,
            VfsError::ReadOnly => libc::EROFS,
            VfsError::NotASymlink(_) => libc::EINVAL,
            VfsError::BadHandle(_) => libc::EBADF,
            VfsError::InvalidPath(_) | VfsError::InvalidMapping(_) | VfsError::InvalidConfig(_) => {
                libc::EINVAL
            }
            VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(target_os = "macos")]
fn missing_xattr_errno() -> i32 {
    libc::ENOATTR
}

#[cfg(not(target_os = "macos"))]
fn missing_xattr_errno() -> i32 {
    libc::ENODATA
}

// macOS callers treat a disabled getxattr as a missing attribute.
#[cfg(target_os = "macos")]
fn unsupported_xattr_errno() -> i32 {
    libc::ENOATTR
}

#[cfg(not(target_os = "macos"))]
fn unsupported_xattr_errno() -> i32 {
    libc::EOPNOTSUPP
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => io::Error::new(
                io::ErrorKind::ReadOnlyFilesystem,
                "filesystem is read-only",
            ),
            VfsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::InvalidPath(msg)
            | VfsError::InvalidMapping(msg)
            | VfsError::InvalidConfig(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::Io(e) => e,
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
