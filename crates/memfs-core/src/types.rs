// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions shared between the tree and its callers

/// Inode number of the root directory
pub const ROOT_INODE: u64 = 1;

// `mode_t` is not u32 on every platform
pub(crate) const S_IFMT: u32 = libc::S_IFMT as u32;
pub(crate) const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub(crate) const S_IFREG: u32 = libc::S_IFREG as u32;

/// Kind of a tree entry as reported to callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Derive the kind from the type bits of a POSIX mode
    pub fn from_mode(mode: u32) -> Self {
        if mode & S_IFMT == S_IFDIR {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// The `S_IFMT` bits matching this kind
    pub fn type_bits(self) -> u32 {
        match self {
            EntryKind::File => S_IFREG,
            EntryKind::Directory => S_IFDIR,
        }
    }
}

/// Snapshot of a node's attributes, detached from the tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub name: String,
    /// Full `st_mode`, type bits included
    pub mode: u32,
    pub kind: EntryKind,
    /// Content length for files, zero for directories
    pub size: u64,
}

impl NodeAttr {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Permission bits only
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

/// One entry of a directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: EntryKind,
    pub name: String,
}
