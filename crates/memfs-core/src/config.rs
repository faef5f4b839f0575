// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem configuration
//!
//! All sections have defaults, so a config file only needs to name the
//! fields it overrides.

use serde::{Deserialize, Serialize};

/// What `remove` does with a directory that still has children
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RmdirPolicy {
    /// Refuse with `NotEmpty`, like POSIX `rmdir`
    #[default]
    RequireEmpty,
    /// Drop the whole subtree
    Recursive,
}

/// How `write` applies incoming bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Each write replaces the entire file content; the offset is ignored.
    ///
    /// Deviates from POSIX `write`: a file written by the kernel in several
    /// chunks keeps only the last chunk.
    #[default]
    Replace,
    /// Positional writes; gaps past the end are zero-filled
    Offset,
}

/// Largest file content accepted by default: 1 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

/// Mutation policies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub rmdir: RmdirPolicy,
    pub write_mode: WriteMode,
    /// Reject writes against nodes without an open handle
    pub require_open_for_write: bool,
    /// Writes that would grow a file past this many bytes fail with
    /// `FileTooLarge`
    pub max_file_size: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rmdir: RmdirPolicy::default(),
            write_mode: WriteMode::default(),
            require_open_for_write: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Kernel cache timeouts handed out with entry and attribute replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub policy: PolicyConfig,
    pub cache: CachePolicy,
    /// Permission bits of the root directory
    pub root_mode: u32,
    /// Owner reported for every node; the mounting user when unset
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            cache: CachePolicy::default(),
            root_mode: 0o755,
            uid: None,
            gid: None,
        }
    }
}
