//! Open file and directory handles.
//!
//! Every open call gets its own handle. File handles own a backing
//! descriptor and read with positional I/O, so handles on the same node never
//! share a cursor. Directory handles own a snapshot of the listing taken at
//! open time.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::attr::blocking;
use super::error::{VfsError, VfsResult};
use super::node::{Node, NodeGraph};
use super::types::{DirEntry, FileType};

#[derive(Debug)]
struct DirSnapshot {
    entries: Vec<DirEntry>,
    /// Set once any part of the snapshot was returned.
    served: bool,
}

#[derive(Debug)]
enum HandleKind {
    File(Arc<File>),
    Dir(Mutex<DirSnapshot>),
}

/// State of one open call.
#[derive(Debug)]
pub struct Handle {
    node: Arc<Node>,
    kind: HandleKind,
}

impl Handle {
    /// The node this handle was opened on.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, HandleKind::Dir(_))
    }
}

/// Table of open handles keyed by id.
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, Arc<Handle>>,
    next_id: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open `node`, whose current type is `kind`.
    ///
    /// Directories get a listing snapshot; everything else gets a backing
    /// descriptor opened for reading.
    pub async fn open(&self, graph: &NodeGraph, node: Arc<Node>, kind: FileType) -> VfsResult<u64> {
        let handle_kind = if kind.is_dir() {
            let entries = graph.list(&node).await?;
            HandleKind::Dir(Mutex::new(DirSnapshot {
                entries,
                served: false,
            }))
        } else {
            let backing = node
                .backing_path()
                .ok_or_else(|| VfsError::is_a_directory(node.path().display().to_string()))?
                .to_path_buf();
            // Nonblocking so a FIFO without a writer cannot stall the open.
            let file = blocking(move || {
                OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&backing)
            })
            .await?;
            HandleKind::File(Arc::new(file))
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            id,
            Arc::new(Handle {
                node,
                kind: handle_kind,
            }),
        );
        Ok(id)
    }

    /// Handle by id.
    pub fn get(&self, id: u64) -> VfsResult<Arc<Handle>> {
        self.handles
            .get(&id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(VfsError::BadHandle(id))
    }

    /// Read up to `size` bytes at `offset`. Short reads only happen at EOF.
    pub async fn read(&self, id: u64, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let handle = self.get(id)?;
        let file = match &handle.kind {
            HandleKind::File(file) => Arc::clone(file),
            HandleKind::Dir(_) => {
                return Err(VfsError::is_a_directory(
                    handle.node.path().display().to_string(),
                ));
            }
        };

        blocking(move || {
            let mut buf = vec![0u8; size];
            let mut filled = 0;
            while filled < size {
                match file.read_at(&mut buf[filled..], offset + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
    }

    /// Entries of a directory handle starting at `offset`.
    ///
    /// A request at offset 0 after the snapshot was already served rewinds:
    /// the listing is recomputed so the caller sees the complete, current set.
    pub async fn readdir(&self, graph: &NodeGraph, id: u64, offset: usize) -> VfsResult<Vec<DirEntry>> {
        let handle = self.get(id)?;
        let HandleKind::Dir(snapshot) = &handle.kind else {
            return Err(VfsError::not_a_directory(
                handle.node.path().display().to_string(),
            ));
        };

        let rewind = offset == 0 && snapshot.lock().served;
        if rewind {
            let entries = graph.list(&handle.node).await?;
            snapshot.lock().entries = entries;
        }

        let mut snapshot = snapshot.lock();
        snapshot.served = true;
        Ok(snapshot.entries.iter().skip(offset).cloned().collect())
    }

    /// Close a handle, releasing its backing descriptor.
    pub fn release(&self, id: u64) -> VfsResult<()> {
        self.handles
            .remove(&id)
            .map(|_| ())
            .ok_or(VfsError::BadHandle(id))
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
