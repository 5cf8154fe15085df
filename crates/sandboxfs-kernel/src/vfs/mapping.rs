//! Mapping table with longest-prefix resolution.
//!
//! Binds virtual path prefixes to backing paths on the host. The table is
//! built once at mount time and never changes afterwards.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::ops::Bound;
use std::path::{Component, Path, PathBuf};

use super::error::{VfsError, VfsResult};

/// A single mapping from a virtual path to a backing path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappingRule {
    /// Absolute, clean path inside the mount (e.g., "/src").
    pub virtual_path: PathBuf,
    /// Absolute path on the host that backs `virtual_path`.
    pub backing_path: PathBuf,
    /// Whether the mapping was requested as read/write.
    #[serde(default)]
    pub writable: bool,
}

impl MappingRule {
    /// Create a read-only mapping.
    pub fn read_only(virtual_path: impl Into<PathBuf>, backing_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            backing_path: backing_path.into(),
            writable: false,
        }
    }

    /// Create a read/write mapping.
    pub fn read_write(virtual_path: impl Into<PathBuf>, backing_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            backing_path: backing_path.into(),
            writable: true,
        }
    }

    /// Check that both paths are absolute and the virtual path is clean.
    pub fn validate(&self) -> VfsResult<()> {
        if !is_clean_absolute(&self.virtual_path) {
            return Err(VfsError::invalid_mapping(format!(
                "virtual path {} must be absolute and clean",
                self.virtual_path.display()
            )));
        }
        if !self.backing_path.is_absolute() {
            return Err(VfsError::invalid_mapping(format!(
                "backing path {} must be absolute",
                self.backing_path.display()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            if self.writable { "rw" } else { "ro" },
            self.virtual_path.display(),
            self.backing_path.display()
        )
    }
}

/// Returns true if `path` is absolute with no `.`/`..` components, no
/// repeated separators and no trailing separator (except for `/` itself).
pub fn is_clean_absolute(path: &Path) -> bool {
    let Some(s) = path.to_str() else {
        // Non-UTF-8 paths are fine as long as the components are.
        return path.is_absolute()
            && path
                .components()
                .skip(1)
                .all(|c| matches!(c, Component::Normal(_)));
    };
    if s == "/" {
        return true;
    }
    s.starts_with('/')
        && !s.ends_with('/')
        && s[1..]
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Ordered, immutable set of mapping rules.
///
/// Queries are component-wise: `/a` is an ancestor of `/a/b` but not of
/// `/ab`. Because `Path` ordering is also component-wise, all mappings below
/// a given path form one contiguous range of the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    rules: BTreeMap<PathBuf, MappingRule>,
    order: Vec<PathBuf>,
}

impl MappingTable {
    /// Build a table, rejecting invalid or colliding rules.
    pub fn new(rules: impl IntoIterator<Item = MappingRule>) -> VfsResult<Self> {
        let mut table = Self::default();
        for rule in rules {
            rule.validate()?;
            if table.rules.contains_key(&rule.virtual_path) {
                return Err(VfsError::invalid_mapping(format!(
                    "duplicate mapping for {}",
                    rule.virtual_path.display()
                )));
            }
            table.order.push(rule.virtual_path.clone());
            table.rules.insert(rule.virtual_path.clone(), rule);
        }
        Ok(table)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in the order they were supplied.
    pub fn rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.order.iter().filter_map(|p| self.rules.get(p))
    }

    /// The rule whose virtual path is exactly `path`.
    pub fn get(&self, path: &Path) -> Option<&MappingRule> {
        self.rules.get(path)
    }

    /// The rule with the longest virtual path that is `path` or an ancestor of it.
    pub fn resolve_owner(&self, path: &Path) -> Option<&MappingRule> {
        path.ancestors().find_map(|ancestor| self.rules.get(ancestor))
    }

    /// Backing path for `path` computed through its owning mapping.
    pub fn backing_path(&self, path: &Path) -> Option<PathBuf> {
        let owner = self.resolve_owner(path)?;
        let suffix = path.strip_prefix(&owner.virtual_path).ok()?;
        if suffix.as_os_str().is_empty() {
            Some(owner.backing_path.clone())
        } else {
            Some(owner.backing_path.join(suffix))
        }
    }

    fn descendants<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.rules
            .range::<Path, _>((Bound::Excluded(path), Bound::Unbounded))
            .map(|(p, _)| p)
            .take_while(move |p| p.starts_with(path))
    }

    /// Returns true if some mapping lies strictly below `path`.
    pub fn has_descendants(&self, path: &Path) -> bool {
        self.descendants(path).next().is_some()
    }

    /// The next path component of every mapping strictly below `path`.
    pub fn children_mappings(&self, path: &Path) -> BTreeSet<OsString> {
        self.descendants(path)
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|rest| rest.components().next())
            .map(|c| c.as_os_str().to_os_string())
            .collect()
    }
}
