//! FUSE transport.
//!
//! Adapts `fuser` callbacks to [`VfsOps`]. Every request is moved onto the
//! tokio runtime and answered from there, so slow backing I/O for one request
//! never holds up the session loop or other requests.

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyXattr, Request,
};
use sandboxfs_kernel::{
    AccessMode, AllowPolicy, Credentials, FileAttr, FileType, OpenFlags, VfsError, VfsOps,
};
use tokio::runtime::Handle;

/// Offsets 1 and 2 belong to `.` and `..`; kernel entries follow.
const SYNTHETIC_ENTRIES: u64 = 2;

/// `fuser::Filesystem` implementation serving a sandboxfs mount.
pub struct SandboxFs {
    ops: Arc<dyn VfsOps>,
    runtime: Handle,
    ttl: Duration,
}

impl SandboxFs {
    pub fn new(ops: Arc<dyn VfsOps>, runtime: Handle, ttl: Duration) -> Self {
        Self { ops, runtime, ttl }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

/// Mount options for a read-only sandboxfs mount under `allow`.
pub fn mount_options(allow: AllowPolicy) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("sandboxfs".to_string()),
        MountOption::Subtype("sandboxfs".to_string()),
        MountOption::RO,
    ];
    match allow {
        AllowPolicy::SelfOnly => {}
        AllowPolicy::Other => options.push(MountOption::AllowOther),
        AllowPolicy::Root => options.push(MountOption::AllowRoot),
    }
    options
}

fn credentials(req: &Request<'_>) -> Credentials {
    Credentials::new(req.uid(), req.gid())
}

fn errno(op: &'static str, e: &VfsError) -> i32 {
    tracing::debug!(op, error = %e, "request failed");
    e.errno()
}

pub(crate) fn to_fuse_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
        FileType::Symlink => fuser::FileType::Symlink,
        FileType::BlockDevice => fuser::FileType::BlockDevice,
        FileType::CharDevice => fuser::FileType::CharDevice,
        FileType::NamedPipe => fuser::FileType::NamedPipe,
        FileType::Socket => fuser::FileType::Socket,
    }
}

pub(crate) fn to_fuse_attr(attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: to_fuse_kind(attr.kind),
        perm: (attr.perm & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

/// NUL-terminated concatenation of attribute names, as listxattr returns them.
pub(crate) fn encode_xattr_names(names: &[OsString]) -> Vec<u8> {
    let mut buf = Vec::new();
    for name in names {
        buf.extend_from_slice(name.as_encoded_bytes());
        buf.push(0);
    }
    buf
}

/// Answer an xattr request: a size probe when `size` is 0, ERANGE when the
/// caller's buffer is too small, the data otherwise.
fn reply_xattr(reply: ReplyXattr, size: u32, data: &[u8]) {
    let Ok(len) = u32::try_from(data.len()) else {
        reply.error(libc::E2BIG);
        return;
    };
    if size == 0 {
        reply.size(len);
    } else if len > size {
        reply.error(libc::ERANGE);
    } else {
        reply.data(data);
    }
}

impl Filesystem for SandboxFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!("filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let ops = Arc::clone(&self.ops);
        let creds = credentials(req);
        let name = name.to_os_string();
        let ttl = self.ttl;
        self.spawn(async move {
            match ops.lookup(parent, &name, &creds).await {
                Ok(attr) => reply.entry(&ttl, &to_fuse_attr(&attr), 0),
                Err(e) => reply.error(errno("lookup", &e)),
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let ops = Arc::clone(&self.ops);
        let ttl = self.ttl;
        self.spawn(async move {
            match ops.getattr(ino).await {
                Ok(attr) => reply.attr(&ttl, &to_fuse_attr(&attr)),
                Err(e) => reply.error(errno("getattr", &e)),
            }
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.readlink(ino).await {
                Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
                Err(e) => reply.error(errno("readlink", &e)),
            }
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let ops = Arc::clone(&self.ops);
        let creds = credentials(req);
        self.spawn(async move {
            match ops.open(ino, OpenFlags::from_raw(flags), &creds).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(errno("open", &e)),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.read(fh, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno("read", &e)),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.release(fh).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("release", &e)),
            }
        });
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let ops = Arc::clone(&self.ops);
        let creds = credentials(req);
        self.spawn(async move {
            match ops.opendir(ino, &creds).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(errno("opendir", &e)),
            }
        });
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, reply: ReplyDirectory) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            let mut reply = reply;
            let mut offset = u64::try_from(offset).unwrap_or(0);

            if offset == 0 {
                if reply.add(ino, 1, fuser::FileType::Directory, ".") {
                    reply.ok();
                    return;
                }
                offset = 1;
            }
            if offset == 1 {
                let parent = match ops.lookup(ino, OsStr::new(".."), &Credentials::root()).await {
                    Ok(attr) => attr.ino,
                    Err(_) => ino,
                };
                if reply.add(parent, 2, fuser::FileType::Directory, "..") {
                    reply.ok();
                    return;
                }
                offset = SYNTHETIC_ENTRIES;
            }

            match ops.readdir(fh, offset - SYNTHETIC_ENTRIES).await {
                Ok(entries) => {
                    for (i, entry) in entries.iter().enumerate() {
                        let next = (offset + i as u64 + 1) as i64;
                        if reply.add(entry.ino, next, to_fuse_kind(entry.kind), &entry.name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(e) => reply.error(errno("readdir", &e)),
            }
        });
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.release(fh).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("releasedir", &e)),
            }
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.statfs(ino).await {
                Ok(st) => reply.statfs(
                    st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                    st.frsize,
                ),
                Err(e) => reply.error(errno("statfs", &e)),
            }
        });
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let ops = Arc::clone(&self.ops);
        let name = name.to_os_string();
        self.spawn(async move {
            match ops.getxattr(ino, &name).await {
                Ok(value) => reply_xattr(reply, size, &value),
                Err(e) => reply.error(errno("getxattr", &e)),
            }
        });
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let ops = Arc::clone(&self.ops);
        self.spawn(async move {
            match ops.listxattr(ino).await {
                Ok(names) => reply_xattr(reply, size, &encode_xattr_names(&names)),
                Err(e) => reply.error(errno("listxattr", &e)),
            }
        });
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let ops = Arc::clone(&self.ops);
        let creds = credentials(req);
        self.spawn(async move {
            match ops.access(ino, AccessMode::from_mask(mask), &creds).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("access", &e)),
            }
        });
    }
}
