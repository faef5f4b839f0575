// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inode number allocation

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ROOT_INODE;

/// Monotonic inode counter shared by every node of one filesystem.
///
/// Seeded with the root inode, so the first allocation returns 2. Numbers
/// are never handed out twice, even after the node that held one is gone.
#[derive(Debug)]
pub struct InodeAllocator {
    last: AtomicU64,
}

impl InodeAllocator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(ROOT_INODE),
        }
    }

    /// Allocate the next inode number.
    ///
    /// `parent` and `name` do not influence the result; allocation is one
    /// flat counter for the whole filesystem.
    pub fn next(&self, parent: u64, name: &str) -> u64 {
        let ino = self.last.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(parent, entry = name, ino, "allocated inode");
        ino
    }

    /// Highest inode handed out so far
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for InodeAllocator {
    fn default() -> Self {
        Self::new()
    }
}
