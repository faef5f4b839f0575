// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs FUSE host: in-memory filesystem over FUSE
//!
//! This binary mounts an empty `MemFs` tree at the given mount point and
//! serves it until interrupted with Ctrl-C or unmounted from outside
//! (`fusermount -u`). Nothing is persisted; the tree is gone once the
//! process exits.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod errno;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::MemFsFuse;
use anyhow::{Context, Result};
use clap::Parser;
use memfs_core::FsConfig;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log verbosity accepted on the command line; `RUST_LOG` takes precedence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser)]
#[command(name = "memfs-fuse-host", about = "Mount an in-memory filesystem over FUSE")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: FsConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    info!("Starting memfs FUSE host");
    info!("Mount point: {}", args.mount_point.display());

    let config = load_config(args.config)?;
    info!("Configuration loaded: {:?}", config);

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        anyhow::ensure!(
            args.mount_point.is_dir(),
            "mount point {} is not an existing directory",
            args.mount_point.display()
        );

        // Woken by Ctrl-C or by the adapter's `destroy` after an external unmount
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let filesystem = MemFsFuse::new(config).with_shutdown_notifier(stop_tx.clone());

        let mut mount_options = vec![
            fuser::MountOption::FSName("memfs".to_string()),
            fuser::MountOption::Subtype("memfs".to_string()),
        ];
        if args.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }
        if args.allow_root {
            mount_options.push(fuser::MountOption::AllowRoot);
        }
        if args.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        ctrlc::set_handler(move || {
            let _ = stop_tx.send(());
        })
        .context("installing SIGINT handler")?;

        info!("Mounting filesystem...");
        let session = fuser::spawn_mount2(filesystem, &args.mount_point, &mount_options)
            .with_context(|| format!("mounting at {}", args.mount_point.display()))?;
        info!("memfs mounted; press Ctrl-C to unmount");

        let _ = stop_rx.recv();
        info!("Shutting down memfs at {}", args.mount_point.display());
        session.join();
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        tracing::warn!("FUSE support not compiled in. This binary is for testing only.");
        let fs = memfs_core::MemFs::new(config);
        info!("memfs core initialized with root inode {}", fs.root().ino);
        info!("To enable FUSE support, build on Linux with: cargo build --features fuse");
    }

    Ok(())
}
