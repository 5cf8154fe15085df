//! Request dispatcher.
//!
//! Ties the node graph, attribute translation and handle table together
//! behind [`VfsOps`]. Permission checks happen here, against the virtualized
//! attributes, before any component is asked to do work.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::Arc;

use super::access;
use super::attr::{AttributeTranslator, BLOCK_SIZE, blocking};
use super::error::{VfsError, VfsResult};
use super::handle::HandleTable;
use super::mapping::MappingTable;
use super::node::{Node, NodeGraph};
use super::ops::VfsOps;
use super::types::{AccessMode, Credentials, DirEntry, FileAttr, OpenFlags, StatFs};
use crate::config::MountConfig;

/// Serves requests for one mount.
#[derive(Debug)]
pub struct Dispatcher {
    graph: NodeGraph,
    attrs: AttributeTranslator,
    handles: HandleTable,
}

impl Dispatcher {
    pub fn new(mappings: MappingTable, owner: Credentials, xattrs: bool) -> Self {
        Self {
            graph: NodeGraph::new(mappings),
            attrs: AttributeTranslator::new(owner, xattrs),
            handles: HandleTable::new(),
        }
    }

    /// Build a dispatcher from a validated configuration.
    pub fn from_config(config: &MountConfig) -> VfsResult<Self> {
        let mappings = config.mapping_table()?;
        for rule in mappings.rules() {
            tracing::info!(mapping = %rule, "mapping");
        }
        Ok(Self::new(mappings, config.owner, config.xattrs))
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Resolve an absolute virtual path to its node.
    pub async fn resolve(&self, path: impl AsRef<std::path::Path>) -> VfsResult<Arc<Node>> {
        self.graph.resolve(path.as_ref()).await
    }

    /// Attributes of an already resolved node.
    pub async fn attributes_of(&self, node: &Node) -> VfsResult<FileAttr> {
        self.attrs.attributes_of(node).await
    }

    fn check(&self, node: &Node, attr: &FileAttr, creds: &Credentials, mode: AccessMode) -> VfsResult<()> {
        access::require(attr, creds, mode, &node.path().display().to_string())
    }
}

#[async_trait]
impl VfsOps for Dispatcher {
    async fn lookup(&self, parent: u64, name: &OsStr, creds: &Credentials) -> VfsResult<FileAttr> {
        tracing::debug!(parent, name = ?name, "lookup");
        let parent = self.graph.node(parent)?;
        let parent_attr = self.attrs.attributes_of(&parent).await?;
        if !parent_attr.is_dir() {
            return Err(VfsError::not_a_directory(parent.path().display().to_string()));
        }
        self.check(&parent, &parent_attr, creds, AccessMode::EXECUTE)?;

        let node = self.graph.lookup(&parent, name).await?;
        self.attrs.attributes_of(&node).await
    }

    async fn getattr(&self, ino: u64) -> VfsResult<FileAttr> {
        tracing::debug!(ino, "getattr");
        let node = self.graph.node(ino)?;
        self.attrs.attributes_of(&node).await
    }

    async fn readlink(&self, ino: u64) -> VfsResult<PathBuf> {
        tracing::debug!(ino, "readlink");
        let node = self.graph.node(ino)?;
        self.attrs.readlink(&node).await
    }

    async fn access(&self, ino: u64, mode: AccessMode, creds: &Credentials) -> VfsResult<()> {
        tracing::debug!(ino, ?mode, uid = creds.uid, "access");
        let node = self.graph.node(ino)?;

        let mut ancestor = node.parent();
        while let Some(dir) = ancestor {
            let attr = self.attrs.attributes_of(&dir).await?;
            self.check(&dir, &attr, creds, AccessMode::EXECUTE)?;
            ancestor = dir.parent();
        }

        let attr = self.attrs.attributes_of(&node).await?;
        self.check(&node, &attr, creds, mode)
    }

    async fn open(&self, ino: u64, flags: OpenFlags, creds: &Credentials) -> VfsResult<u64> {
        tracing::debug!(ino, ?flags, "open");
        let node = self.graph.node(ino)?;
        if flags.wants_mutation() {
            tracing::debug!(
                path = %node.path().display(),
                writable = node.writable(),
                "rejecting mutation on read-only mount"
            );
            return Err(VfsError::ReadOnly);
        }
        let attr = self.attrs.attributes_of(&node).await?;
        self.check(&node, &attr, creds, AccessMode::READ)?;
        let fh = self.handles.open(&self.graph, node, attr.kind).await?;
        tracing::debug!(ino, fh, "opened");
        Ok(fh)
    }

    async fn opendir(&self, ino: u64, creds: &Credentials) -> VfsResult<u64> {
        tracing::debug!(ino, "opendir");
        let node = self.graph.node(ino)?;
        let attr = self.attrs.attributes_of(&node).await?;
        if !attr.is_dir() {
            return Err(VfsError::not_a_directory(node.path().display().to_string()));
        }
        self.check(&node, &attr, creds, AccessMode::READ)?;
        self.handles.open(&self.graph, node, attr.kind).await
    }

    async fn read(&self, fh: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        tracing::debug!(fh, offset, size, "read");
        self.handles.read(fh, offset, size as usize).await
    }

    async fn readdir(&self, fh: u64, offset: u64) -> VfsResult<Vec<DirEntry>> {
        tracing::debug!(fh, offset, "readdir");
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        self.handles.readdir(&self.graph, fh, offset).await
    }

    async fn release(&self, fh: u64) -> VfsResult<()> {
        tracing::debug!(fh, "release");
        self.handles.release(fh)
    }

    async fn getxattr(&self, ino: u64, name: &OsStr) -> VfsResult<Vec<u8>> {
        tracing::debug!(ino, name = ?name, "getxattr");
        let node = self.graph.node(ino)?;
        self.attrs.getxattr(&node, name).await
    }

    async fn listxattr(&self, ino: u64) -> VfsResult<Vec<OsString>> {
        tracing::debug!(ino, "listxattr");
        let node = self.graph.node(ino)?;
        self.attrs.listxattr(&node).await
    }

    async fn statfs(&self, ino: u64) -> VfsResult<StatFs> {
        tracing::debug!(ino, "statfs");
        let root = self.graph.root();
        let Some(backing) = root.backing_path().map(|p| p.to_path_buf()) else {
            return Ok(StatFs::default());
        };

        let stat = blocking(move || {
            rustix::fs::statvfs(backing.as_path()).map_err(std::io::Error::from)
        })
        .await?;
        let scale = |blocks: u64| blocks.saturating_mul(stat.f_frsize) / u64::from(BLOCK_SIZE);
        Ok(StatFs {
            blocks: scale(stat.f_blocks),
            bfree: scale(stat.f_bfree),
            bavail: scale(stat.f_bavail),
            files: stat.f_files,
            ffree: stat.f_ffree,
            bsize: BLOCK_SIZE,
            namelen: u32::try_from(stat.f_namemax).unwrap_or(u32::MAX),
            frsize: BLOCK_SIZE,
        })
    }
}
