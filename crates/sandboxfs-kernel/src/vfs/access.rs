//! POSIX permission evaluation against virtualized attributes.

use super::error::{VfsError, VfsResult};
use super::types::{AccessMode, Credentials, FileAttr};

/// Returns true if `creds` may access a node with `attr` in `mode`.
///
/// The privileged identity bypasses mode checks. Otherwise exactly one
/// permission class applies: owner if the uid matches, else group if the gid
/// matches, else other.
pub fn permits(attr: &FileAttr, creds: &Credentials, mode: AccessMode) -> bool {
    if creds.is_privileged() || mode.is_exists_only() {
        return true;
    }

    let bits = if creds.uid == attr.uid {
        (attr.perm >> 6) & 0o7
    } else if creds.gid == attr.gid {
        (attr.perm >> 3) & 0o7
    } else {
        attr.perm & 0o7
    };

    (!mode.read || bits & 0o4 != 0)
        && (!mode.write || bits & 0o2 != 0)
        && (!mode.execute || bits & 0o1 != 0)
}

/// Like [`permits`], failing with `PermissionDenied` naming `path`.
pub fn require(attr: &FileAttr, creds: &Credentials, mode: AccessMode, path: &str) -> VfsResult<()> {
    if permits(attr, creds, mode) {
        Ok(())
    } else {
        tracing::debug!(path, uid = creds.uid, gid = creds.gid, ?mode, "access denied");
        Err(VfsError::permission_denied(path))
    }
}
