//! sandboxfs binary
//!
//! Mounts a read-only virtual tree assembled from mapping rules.
//!
//! ## Usage
//!
//! ```bash
//! # Expose /srv/root at the mount root and a project under /src
//! sandboxfs --mapping ro:/:/srv/root --mapping ro:/src:/home/user/project /mnt/sandbox
//!
//! # Read mappings and options from a TOML file
//! sandboxfs --config sandbox.toml --allow other /mnt/sandbox
//! ```
//!
//! Unmount with `fusermount -u MOUNT_POINT` (or `umount` on macOS).

mod fuse;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sandboxfs_kernel::{AllowPolicy, Dispatcher, MappingRule, MountConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::fuse::{SandboxFs, mount_options};

/// A virtual file system for sandboxing.
#[derive(Parser, Debug)]
#[command(name = "sandboxfs", version)]
struct Args {
    /// Mapping of the form TYPE:VIRTUAL:BACKING, where TYPE is ro or rw.
    #[arg(long = "mapping", value_name = "TYPE:VIRTUAL:BACKING")]
    mappings: Vec<MappingRule>,

    /// TOML file with mappings and options; command-line values are merged on top.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Proxy extended attributes to backing files.
    #[arg(long)]
    xattrs: bool,

    /// Who besides the mounting user may access the mount: self, other or root.
    #[arg(long, value_name = "POLICY")]
    allow: Option<AllowPolicy>,

    /// Attribute and entry cache lifetime in seconds.
    #[arg(long, value_name = "SECS")]
    ttl: Option<u64>,

    /// Directory to mount on.
    mount_point: PathBuf,
}

impl Args {
    /// Merge the optional config file with command-line values.
    fn mount_config(&self) -> anyhow::Result<MountConfig> {
        let mut config = match &self.config {
            Some(path) => MountConfig::load(path)?,
            None => MountConfig::default(),
        };
        config.mappings.extend(self.mappings.iter().cloned());
        config.xattrs |= self.xattrs;
        if let Some(allow) = self.allow {
            config.allow = allow;
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.mount_config().context("invalid mount configuration")?;
    let dispatcher = Dispatcher::from_config(&config)?;

    let fs = SandboxFs::new(
        Arc::new(dispatcher),
        tokio::runtime::Handle::current(),
        config.ttl(),
    );
    let options = mount_options(config.allow);
    let mount_point = args.mount_point;

    tracing::info!(
        mount_point = %mount_point.display(),
        xattrs = config.xattrs,
        allow = %config.allow,
        "mounting"
    );
    let shown = mount_point.display().to_string();
    tokio::task::spawn_blocking(move || fuser::mount2(fs, &mount_point, &options))
        .await
        .context("FUSE session panicked")?
        .with_context(|| format!("failed to mount {shown}"))?;

    tracing::info!(mount_point = %shown, "unmounted");
    Ok(())
}
