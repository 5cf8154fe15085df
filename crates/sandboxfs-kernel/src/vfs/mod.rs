//! Virtual filesystem engine.
//!
//! Key components:
//!
//! - [`MappingTable`] - Longest-prefix table of mapping rules
//! - [`NodeGraph`] - Lazily materialized tree of real and scaffold nodes
//! - [`AttributeTranslator`] - Virtualized attributes and xattr proxying
//! - [`HandleTable`] - Per-open file descriptors and directory snapshots
//! - [`Dispatcher`] - [`VfsOps`] implementation with permission checks
//!
//! ## Design Decisions
//!
//! - **Inode-addressed**: Transports address nodes by inode number. The root
//!   is inode 1 and numbers are never reused within a mount.
//! - **Path-backed real nodes**: A real node stores its backing path, not a
//!   descriptor, so every access sees the current backing object.
//! - **Nested mappings shadow**: A mapping at `X/name` always wins over a
//!   backing entry called `name` under `X`.
//! - **Read-only**: Opens requesting any mutation fail with EROFS.

pub mod access;
pub mod attr;
mod dispatch;
mod error;
mod handle;
mod mapping;
mod node;
mod ops;
mod types;

pub use attr::{AttributeTranslator, BLOCK_SIZE, DIR_NLINK, SCAFFOLD_PERM};
pub use dispatch::Dispatcher;
pub use error::{VfsError, VfsResult};
pub use handle::{Handle, HandleTable};
pub use mapping::{MappingRule, MappingTable, is_clean_absolute};
pub use node::{Node, NodeGraph, NodeKind, ROOT_INO};
pub use ops::VfsOps;
pub use types::{AccessMode, Credentials, DirEntry, FileAttr, FileType, OpenFlags, StatFs};
