//! # sandboxfs-kernel
//!
//! Engine for a sandboxing filesystem: a read-only virtual tree assembled
//! from mapping rules that bind virtual paths to directories or files on the
//! host.
//!
//! A mount is described by a [`MountConfig`]. The [`Dispatcher`] built from
//! it resolves paths lazily, computes attributes, and serves open handles
//! through the [`VfsOps`] trait, which a transport (FUSE in the server crate)
//! drives with inode numbers and handle ids.
//!
//! Paths that lead to a deeper mapping but are not mapped themselves appear
//! as scaffold directories: immutable, owned by the mounting identity, with
//! no extended attributes.

pub mod config;
pub mod vfs;

pub use config::{AllowPolicy, MountConfig};
pub use vfs::{
    AccessMode, Credentials, DirEntry, Dispatcher, FileAttr, FileType, MappingRule, MappingTable,
    OpenFlags, StatFs, VfsError, VfsOps, VfsResult,
};
