//! Mount configuration.
//!
//! A mount is described by its mapping rules plus a few transport knobs. The
//! configuration can be read from a TOML file or assembled from command-line
//! mapping strings of the form `TYPE:VIRTUAL:BACKING`:
//!
//! ```toml
//! xattrs = true
//! allow = "other"
//! ttl = 30
//!
//! [[mappings]]
//! virtual_path = "/"
//! backing_path = "/srv/root"
//!
//! [[mappings]]
//! virtual_path = "/src"
//! backing_path = "/home/user/project"
//! writable = true
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::vfs::{Credentials, MappingRule, MappingTable, VfsError, VfsResult};

/// Default attribute and entry cache lifetime, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Which users besides the mounting one may access the mount.
///
/// Only forwarded to the transport as mount options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowPolicy {
    /// Only the mounting user.
    #[default]
    #[serde(rename = "self")]
    SelfOnly,
    /// Every user.
    Other,
    /// The mounting user and root.
    Root,
}

impl FromStr for AllowPolicy {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(AllowPolicy::SelfOnly),
            "other" => Ok(AllowPolicy::Other),
            "root" => Ok(AllowPolicy::Root),
            other => Err(VfsError::invalid_config(format!(
                "unknown allow policy {other:?} (expected self, other or root)"
            ))),
        }
    }
}

impl fmt::Display for AllowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllowPolicy::SelfOnly => "self",
            AllowPolicy::Other => "other",
            AllowPolicy::Root => "root",
        })
    }
}

impl FromStr for MappingRule {
    type Err = VfsError;

    /// Parse `ro:/virtual:/backing` or `rw:/virtual:/backing`.
    ///
    /// The backing path is everything after the second colon, so it may
    /// itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(virtual_path), Some(backing_path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(VfsError::invalid_mapping(format!(
                "{s:?}: expected TYPE:VIRTUAL:BACKING"
            )));
        };

        let rule = match kind {
            "ro" => MappingRule::read_only(virtual_path, backing_path),
            "rw" => MappingRule::read_write(virtual_path, backing_path),
            other => {
                return Err(VfsError::invalid_mapping(format!(
                    "{s:?}: unknown mapping type {other:?} (expected ro or rw)"
                )));
            }
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// Everything needed to serve one mount.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mapping rules, in the order supplied.
    pub mappings: Vec<MappingRule>,
    /// Proxy extended attributes to backing objects.
    pub xattrs: bool,
    /// Access policy for other users.
    pub allow: AllowPolicy,
    /// Attribute and entry cache lifetime in seconds.
    pub ttl: u64,
    /// Identity that owns scaffold directories.
    pub owner: Credentials,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            xattrs: false,
            allow: AllowPolicy::default(),
            ttl: DEFAULT_TTL_SECS,
            owner: current_identity(),
        }
    }
}

impl MountConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> VfsResult<Self> {
        toml::from_str(text).map_err(|e| VfsError::invalid_config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> VfsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::invalid_config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
            .map_err(|e| VfsError::invalid_config(format!("{}: {e}", path.display())))
    }

    /// Cache lifetime as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Check every rule and build the table.
    pub fn mapping_table(&self) -> VfsResult<MappingTable> {
        if self.mappings.is_empty() {
            return Err(VfsError::invalid_mapping("no mappings configured"));
        }
        MappingTable::new(self.mappings.iter().cloned())
    }

    /// Validate without keeping the table.
    pub fn validate(&self) -> VfsResult<()> {
        self.mapping_table().map(|_| ())
    }
}

/// Effective identity of this process.
pub fn current_identity() -> Credentials {
    Credentials::new(
        rustix::process::getuid().as_raw(),
        rustix::process::getgid().as_raw(),
    )
}
