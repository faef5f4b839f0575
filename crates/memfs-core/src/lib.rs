// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs core: an in-memory node tree served to the kernel over FUSE
//!
//! The crate holds the tree, inode allocation and the per-request handlers.
//! It knows nothing about the FUSE wire protocol; `memfs-fuse-host` adapts
//! kernel requests onto [`MemFs`].

pub mod config;
pub mod error;
pub mod fs;
pub mod inode;
pub mod node;
pub mod types;

pub use config::{
    CachePolicy, FsConfig, PolicyConfig, RmdirPolicy, WriteMode, DEFAULT_MAX_FILE_SIZE,
};
pub use error::{FsError, FsResult};
pub use fs::MemFs;
pub use inode::InodeAllocator;
pub use node::Node;
pub use types::{DirEntry, EntryKind, NodeAttr, ROOT_INODE};
