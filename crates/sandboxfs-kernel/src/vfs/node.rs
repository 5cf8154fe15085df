//! The virtual node graph.
//!
//! Nodes are created lazily as paths are looked up or listed, and are cached
//! for the life of the mount. Each parent owns its children through a
//! concurrent map keyed by name; parents are referenced weakly. Child
//! creation goes through the map's entry API so concurrent resolvers of the
//! same path always converge on a single node.
//!
//! Resolution of `parent/name`:
//!
//! 1. A mapping targets the path exactly: real node backed by the mapping.
//! 2. A mapping lies strictly below the path: scaffold node.
//! 3. The parent is real and the owning mapping's backing tree has the
//!    path: real node.
//! 4. Otherwise: not found.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::fs;

use super::error::{VfsError, VfsResult};
use super::mapping::MappingTable;
use super::types::{DirEntry, FileType};

/// Inode number of the root node.
pub const ROOT_INO: u64 = 1;

/// What backs a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Backed by a host path, resolved at access time.
    Real {
        backing: PathBuf,
        writable: bool,
        /// True if a mapping targets this exact node.
        mapped: bool,
    },
    /// Synthetic directory leading to deeper mappings.
    Scaffold,
}

/// A node of the virtual tree.
#[derive(Debug)]
pub struct Node {
    ino: u64,
    path: PathBuf,
    parent: Weak<Node>,
    kind: NodeKind,
    children: DashMap<OsString, Arc<Node>>,
}

impl Node {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Virtual path of the node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Parent node; `None` for the root.
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    pub fn is_scaffold(&self) -> bool {
        matches!(self.kind, NodeKind::Scaffold)
    }

    /// Backing path for real nodes.
    pub fn backing_path(&self) -> Option<&Path> {
        match &self.kind {
            NodeKind::Real { backing, .. } => Some(backing),
            NodeKind::Scaffold => None,
        }
    }

    /// Whether the mapping that produced this node is read/write.
    pub fn writable(&self) -> bool {
        matches!(self.kind, NodeKind::Real { writable: true, .. })
    }

    fn discovered(&self) -> bool {
        matches!(self.kind, NodeKind::Real { mapped: false, .. })
    }

    /// Number of children materialized so far.
    pub fn cached_children(&self) -> usize {
        self.children.len()
    }
}

/// Lazily built tree of nodes over a mapping table.
#[derive(Debug)]
pub struct NodeGraph {
    mappings: MappingTable,
    root: Arc<Node>,
    inodes: DashMap<u64, Weak<Node>>,
    next_ino: AtomicU64,
}

impl NodeGraph {
    /// Build the graph. Only the root exists until paths are resolved.
    pub fn new(mappings: MappingTable) -> Self {
        let root_path = PathBuf::from("/");
        let kind = match mappings.get(&root_path) {
            Some(rule) => NodeKind::Real {
                backing: rule.backing_path.clone(),
                writable: rule.writable,
                mapped: true,
            },
            None => NodeKind::Scaffold,
        };
        let root = Arc::new(Node {
            ino: ROOT_INO,
            path: root_path,
            parent: Weak::new(),
            kind,
            children: DashMap::new(),
        });

        let inodes = DashMap::new();
        inodes.insert(ROOT_INO, Arc::downgrade(&root));

        Self {
            mappings,
            root,
            inodes,
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    pub fn root(&self) -> Arc<Node> {
        Arc::clone(&self.root)
    }

    /// Node by inode number.
    pub fn node(&self, ino: u64) -> VfsResult<Arc<Node>> {
        self.inodes
            .get(&ino)
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    /// Number of nodes materialized so far, including the root.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// Always false: the root always exists.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Resolve a child of `parent` by name.
    pub async fn lookup(&self, parent: &Arc<Node>, name: &OsStr) -> VfsResult<Arc<Node>> {
        if name.is_empty() || name.as_encoded_bytes().contains(&b'/') {
            return Err(VfsError::invalid_path(name.to_string_lossy()));
        }
        if name == "." {
            return Ok(Arc::clone(parent));
        }
        if name == ".." {
            return Ok(parent.parent().unwrap_or_else(|| self.root()));
        }

        let cached = parent.children.get(name).map(|c| Arc::clone(c.value()));
        if let Some(child) = cached {
            if child.discovered() {
                if let Some(backing) = child.backing_path() {
                    if !backing_exists(backing).await? {
                        return Err(VfsError::not_found(child.path().display().to_string()));
                    }
                }
            }
            return Ok(child);
        }

        let path = parent.path().join(name);
        let kind = match self.synthetic_kind(&path) {
            Some(kind) => kind,
            None => match parent.kind() {
                NodeKind::Real { writable, .. } => {
                    let Some(candidate) = self.mappings.backing_path(&path) else {
                        return Err(VfsError::not_found(path.display().to_string()));
                    };
                    if !backing_exists(&candidate).await? {
                        return Err(VfsError::not_found(path.display().to_string()));
                    }
                    NodeKind::Real {
                        backing: candidate,
                        writable: *writable,
                        mapped: false,
                    }
                }
                NodeKind::Scaffold => {
                    return Err(VfsError::not_found(path.display().to_string()));
                }
            },
        };

        Ok(self.insert_child(parent, name, path, kind))
    }

    /// Resolve an absolute virtual path from the root.
    pub async fn resolve(&self, path: &Path) -> VfsResult<Arc<Node>> {
        if !path.is_absolute() {
            return Err(VfsError::invalid_path(path.display().to_string()));
        }
        let mut node = self.root();
        for component in path.components().skip(1) {
            node = self.lookup(&node, component.as_os_str()).await?;
        }
        Ok(node)
    }

    /// Entries of a directory node, sorted by name.
    ///
    /// Mapping-derived children come first and shadow any backing entry with
    /// the same name; the backing directory fills in the rest.
    pub async fn list(&self, node: &Arc<Node>) -> VfsResult<Vec<DirEntry>> {
        let mut entries: BTreeMap<OsString, DirEntry> = BTreeMap::new();
        let claimed = self.mappings.children_mappings(node.path());

        for name in claimed.iter().cloned() {
            let path = node.path().join(&name);
            let Some(kind) = self.synthetic_kind(&path) else {
                continue;
            };
            let child = self.insert_child(node, &name, path, kind);
            let file_type = match child.backing_path() {
                None => FileType::Directory,
                Some(backing) => match fs::symlink_metadata(backing).await {
                    Ok(meta) => FileType::from(meta.file_type()),
                    Err(e) => {
                        tracing::warn!(
                            path = %child.path().display(),
                            backing = %backing.display(),
                            error = %e,
                            "skipping mapping with unreadable backing path"
                        );
                        continue;
                    }
                },
            };
            entries.insert(name.clone(), DirEntry::new(name, child.ino(), file_type));
        }

        if let NodeKind::Real {
            backing, writable, ..
        } = node.kind()
        {
            let mut dir = fs::read_dir(backing).await.map_err(|e| {
                if e.raw_os_error() == Some(libc::ENOTDIR) {
                    VfsError::not_a_directory(node.path().display().to_string())
                } else {
                    VfsError::Io(e)
                }
            })?;

            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name();
                if claimed.contains(&name) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                let child = self.insert_child(
                    node,
                    &name,
                    node.path().join(&name),
                    NodeKind::Real {
                        backing: entry.path(),
                        writable: *writable,
                        mapped: false,
                    },
                );
                entries.insert(
                    name.clone(),
                    DirEntry::new(name, child.ino(), FileType::from(file_type)),
                );
            }
        }

        Ok(entries.into_values().collect())
    }

    /// Kind for paths decided by the mapping table alone (cases 1 and 2).
    fn synthetic_kind(&self, path: &Path) -> Option<NodeKind> {
        if let Some(rule) = self.mappings.get(path) {
            Some(NodeKind::Real {
                backing: rule.backing_path.clone(),
                writable: rule.writable,
                mapped: true,
            })
        } else if self.mappings.has_descendants(path) {
            Some(NodeKind::Scaffold)
        } else {
            None
        }
    }

    /// Insert a child unless one already exists under that name.
    fn insert_child(
        &self,
        parent: &Arc<Node>,
        name: &OsStr,
        path: PathBuf,
        kind: NodeKind,
    ) -> Arc<Node> {
        let entry = parent
            .children
            .entry(name.to_os_string())
            .or_insert_with(|| {
                let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
                let node = Arc::new(Node {
                    ino,
                    path,
                    parent: Arc::downgrade(parent),
                    kind,
                    children: DashMap::new(),
                });
                self.inodes.insert(ino, Arc::downgrade(&node));
                tracing::trace!(ino, path = %node.path.display(), "materialized node");
                node
            });
        Arc::clone(entry.value())
    }
}

async fn backing_exists(path: &Path) -> VfsResult<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) => Ok(false),
        Err(e) => Err(VfsError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::mapping::MappingRule;
    use tempfile::TempDir;

    fn graph(rules: Vec<MappingRule>) -> NodeGraph {
        NodeGraph::new(MappingTable::new(rules).unwrap())
    }

    fn names(entries: &[DirEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_root_is_scaffold_without_root_mapping() {
        let dir = TempDir::new().unwrap();
        let g = graph(vec![MappingRule::read_only("/a/b", dir.path())]);
        let root = g.root();
        assert!(root.is_scaffold());
        assert_eq!(root.ino(), ROOT_INO);

        let a = g.lookup(&root, OsStr::new("a")).await.unwrap();
        assert!(a.is_scaffold());
        let b = g.lookup(&a, OsStr::new("b")).await.unwrap();
        assert_eq!(b.backing_path(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_scaffold_hides_unmapped_names() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("other")).unwrap();
        let g = graph(vec![
            MappingRule::read_only("/", dir.path()),
            MappingRule::read_only("/scaffold/dir", dir.path()),
        ]);
        let scaffold = g.resolve(Path::new("/scaffold")).await.unwrap();
        assert!(scaffold.is_scaffold());

        let err = g.lookup(&scaffold, OsStr::new("other")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_discovered_node_under_mapping() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dir1/dir2")).unwrap();
        std::fs::write(dir.path().join("dir1/dir2/file"), "bar baz").unwrap();
        let g = graph(vec![MappingRule::read_only("/", dir.path())]);

        let file = g.resolve(Path::new("/dir1/dir2/file")).await.unwrap();
        assert_eq!(file.backing_path(), Some(dir.path().join("dir1/dir2/file").as_path()));
        assert_eq!(file.path(), Path::new("/dir1/dir2/file"));
        assert!(!file.writable());

        let missing = g.resolve(Path::new("/dir1/nope")).await;
        assert!(matches!(missing, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_nested_mapping_shadows_backing_entry() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        std::fs::write(root.path().join("name"), "from root").unwrap();
        std::fs::write(other.path().join("inner"), "").unwrap();
        let g = graph(vec![
            MappingRule::read_only("/", root.path()),
            MappingRule::read_only("/name", other.path()),
        ]);

        let node = g.resolve(Path::new("/name")).await.unwrap();
        assert_eq!(node.backing_path(), Some(other.path()));

        let entries = g.list(&g.root()).await.unwrap();
        let shadowed: Vec<_> = entries.iter().filter(|e| e.name == "name").collect();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].kind, FileType::Directory);
        assert_eq!(shadowed[0].ino, node.ino());
    }

    #[tokio::test]
    async fn test_discovered_backing_follows_nearest_mapping() {
        let root = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::create_dir_all(project.path().join("sub")).unwrap();
        std::fs::write(project.path().join("sub/file"), "").unwrap();
        let g = graph(vec![
            MappingRule::read_only("/", root.path()),
            MappingRule::read_write("/mnt/project", project.path()),
        ]);

        let file = g.resolve(Path::new("/mnt/project/sub/file")).await.unwrap();
        assert_eq!(
            file.backing_path(),
            Some(project.path().join("sub/file").as_path())
        );
        assert!(file.writable());
        assert_eq!(
            g.mappings().backing_path(file.path()).as_deref(),
            file.backing_path()
        );
    }

    #[tokio::test]
    async fn test_unreadable_mapping_still_shadows_backing_entry() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("name"), "from root").unwrap();
        std::fs::write(root.path().join("kept"), "").unwrap();
        let g = graph(vec![
            MappingRule::read_only("/", root.path()),
            MappingRule::read_only("/name", root.path().join("does-not-exist")),
        ]);

        let entries = g.list(&g.root()).await.unwrap();
        assert_eq!(names(&entries), vec!["kept"]);

        let node = g.resolve(Path::new("/name")).await.unwrap();
        assert_eq!(
            node.backing_path(),
            Some(root.path().join("does-not-exist").as_path())
        );
    }

    #[tokio::test]
    async fn test_listing_mappings_example() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("mappings/dir")).unwrap();
        std::fs::write(root.path().join("mappings/dir/file"), "").unwrap();
        let g = graph(vec![
            MappingRule::read_only("/", root.path()),
            MappingRule::read_only("/mappings/dir", root.path().join("mappings/dir")),
            MappingRule::read_only("/mappings/scaffold/dir", root.path().join("mappings/dir")),
        ]);

        let mappings = g.resolve(Path::new("/mappings")).await.unwrap();
        let entries = g.list(&mappings).await.unwrap();
        assert_eq!(names(&entries), vec!["dir", "scaffold"]);
        assert!(entries.iter().all(|e| e.kind == FileType::Directory));

        let scaffold = g.resolve(Path::new("/mappings/scaffold")).await.unwrap();
        assert!(scaffold.is_scaffold());
        let entries = g.list(&scaffold).await.unwrap();
        assert_eq!(names(&entries), vec!["dir"]);

        let dir = g.resolve(Path::new("/mappings/scaffold/dir")).await.unwrap();
        assert_eq!(dir.backing_path(), Some(root.path().join("mappings/dir").as_path()));
        assert_eq!(names(&g.list(&dir).await.unwrap()), vec!["file"]);
    }

    #[tokio::test]
    async fn test_list_reuses_nodes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), "").unwrap();
        let g = graph(vec![MappingRule::read_only("/", dir.path())]);
        let root = g.root();

        let looked_up = g.lookup(&root, OsStr::new("a")).await.unwrap();
        let entries = g.list(&root).await.unwrap();
        assert_eq!(entries[0].ino, looked_up.ino());
        assert_eq!(root.cached_children(), 1);
        assert_eq!(g.node(looked_up.ino()).unwrap().path(), Path::new("/a"));
    }

    #[tokio::test]
    async fn test_stale_discovered_node_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("gone"), "").unwrap();
        let g = graph(vec![MappingRule::read_only("/", dir.path())]);
        let root = g.root();

        g.lookup(&root, OsStr::new("gone")).await.unwrap();
        std::fs::remove_file(dir.path().join("gone")).unwrap();
        let err = g.lookup(&root, OsStr::new("gone")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dot_and_dotdot() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let g = graph(vec![MappingRule::read_only("/", dir.path())]);
        let root = g.root();
        let sub = g.lookup(&root, OsStr::new("sub")).await.unwrap();

        assert!(Arc::ptr_eq(&g.lookup(&sub, OsStr::new(".")).await.unwrap(), &sub));
        assert!(Arc::ptr_eq(&g.lookup(&sub, OsStr::new("..")).await.unwrap(), &root));
        assert!(Arc::ptr_eq(&g.lookup(&root, OsStr::new("..")).await.unwrap(), &root));
        assert!(g.lookup(&root, OsStr::new("a/b")).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookup_converges() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shared"), "").unwrap();
        let g = Arc::new(graph(vec![MappingRule::read_only("/", dir.path())]));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let g = Arc::clone(&g);
            tasks.push(tokio::spawn(async move {
                let root = g.root();
                g.lookup(&root, OsStr::new("shared")).await.unwrap()
            }));
        }

        let mut nodes = Vec::new();
        for task in tasks {
            nodes.push(task.await.unwrap());
        }
        assert!(nodes.iter().all(|n| Arc::ptr_eq(n, &nodes[0])));
        assert_eq!(g.len(), 2);
    }
}
