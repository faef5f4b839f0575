// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem root and operation handlers
//!
//! `MemFs` is the single entry point the transport layer calls into. Nodes
//! are addressed by inode number; every handler takes the tree lock once,
//! runs its tree algorithm and releases it, so concurrent requests are
//! serialized per filesystem. Inode allocation is atomic on its own and does
//! not depend on the tree lock.
//!
//! Resolving an inode costs one step per ancestor: a side index maps every
//! live inode to its parent's inode, and each directory keys its children by
//! inode. The index owns nothing; the tree stays the only owner of nodes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::{FsConfig, RmdirPolicy};
use crate::error::{FsError, FsResult};
use crate::inode::InodeAllocator;
use crate::node::Node;
use crate::types::{DirEntry, EntryKind, NodeAttr, ROOT_INODE};

/// The node tree plus the inode to parent index guarded with it
#[derive(Debug)]
struct Tree {
    root: Node,
    parents: HashMap<u64, u64>,
}

/// Inodes on the way from the root (exclusive) down to `ino` (inclusive)
fn path_to(parents: &HashMap<u64, u64>, ino: u64) -> Option<Vec<u64>> {
    let mut path = Vec::new();
    let mut current = ino;
    while current != ROOT_INODE {
        path.push(current);
        current = *parents.get(&current)?;
    }
    path.reverse();
    Some(path)
}

impl Tree {
    fn get(&self, ino: u64) -> Option<&Node> {
        let path = path_to(&self.parents, ino)?;
        path.into_iter().try_fold(&self.root, |node, step| node.child(step))
    }

    fn get_mut(&mut self, ino: u64) -> Option<&mut Node> {
        let path = path_to(&self.parents, ino)?;
        let mut node = &mut self.root;
        for step in path {
            node = node.child_mut(step)?;
        }
        Some(node)
    }

    fn insert(
        &mut self,
        inodes: &InodeAllocator,
        parent: u64,
        name: &str,
        kind: EntryKind,
        perm: u32,
    ) -> FsResult<&mut Node> {
        let path = path_to(&self.parents, parent).ok_or(FsError::NotFound)?;
        let mut dir = &mut self.root;
        for step in path {
            dir = dir.child_mut(step).ok_or(FsError::NotFound)?;
        }
        let node = dir.insert_child(inodes, name, kind, perm)?;
        self.parents.insert(node.inode(), parent);
        Ok(node)
    }

    fn remove(
        &mut self,
        parent: u64,
        name: &str,
        is_dir: bool,
        policy: RmdirPolicy,
    ) -> FsResult<Node> {
        let dir = self.get_mut(parent).ok_or(FsError::NotFound)?;
        let removed = dir.remove_child(name, is_dir, policy)?;
        let mut stack = vec![&removed];
        while let Some(node) = stack.pop() {
            self.parents.remove(&node.inode());
            stack.extend(node.children());
        }
        Ok(removed)
    }
}

/// The in-memory filesystem
#[derive(Debug)]
pub struct MemFs {
    config: FsConfig,
    inodes: InodeAllocator,
    tree: Mutex<Tree>,
}

impl MemFs {
    pub fn new(config: FsConfig) -> Self {
        let root = Node::root(config.root_mode & 0o7777);
        Self {
            config,
            inodes: InodeAllocator::new(),
            tree: Mutex::new(Tree {
                root,
                parents: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    // Every mutation is applied in full while the guard is held, so a panic
    // elsewhere cannot leave a half-updated tree behind.
    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_node<T>(&self, ino: u64, f: impl FnOnce(&Node) -> FsResult<T>) -> FsResult<T> {
        let tree = self.tree();
        let node = tree.get(ino).ok_or(FsError::NotFound)?;
        f(node)
    }

    fn with_node_mut<T>(&self, ino: u64, f: impl FnOnce(&mut Node) -> FsResult<T>) -> FsResult<T> {
        let mut tree = self.tree();
        let node = tree.get_mut(ino).ok_or(FsError::NotFound)?;
        f(node)
    }

    /// Attributes of the root directory
    pub fn root(&self) -> NodeAttr {
        self.tree().root.attr()
    }

    pub fn generate_inode(&self, parent: u64, name: &str) -> u64 {
        self.inodes.next(parent, name)
    }

    pub fn attr(&self, ino: u64) -> FsResult<NodeAttr> {
        self.with_node(ino, |node| Ok(node.attr()))
    }

    /// Change the mode of a node.
    ///
    /// A mode that would turn the node into another type (FIFO, socket,
    /// device, symlink, or a file/directory flip) is logged and ignored: the
    /// call still succeeds and returns the unchanged attributes. Size,
    /// ownership and timestamps are not stored at all.
    pub fn setattr(&self, ino: u64, mode: Option<u32>) -> FsResult<NodeAttr> {
        self.with_node_mut(ino, |node| {
            if let Some(mode) = mode {
                if node.set_mode(mode) {
                    debug!(ino, "setattr mode={:o}", node.mode());
                } else {
                    warn!(ino, "ignoring mode change to irregular file type {:o}", mode);
                }
            }
            Ok(node.attr())
        })
    }

    pub fn lookup(&self, parent: u64, name: &str) -> FsResult<NodeAttr> {
        self.with_node(parent, |dir| dir.lookup(name).map(Node::attr))
    }

    /// Create a regular file. The new node also serves as the open handle, so
    /// it starts with one open reference.
    pub fn create(&self, parent: u64, name: &str, mode: u32) -> FsResult<NodeAttr> {
        let attr = {
            let mut tree = self.tree();
            let node = tree.insert(&self.inodes, parent, name, EntryKind::File, mode)?;
            node.open();
            node.attr()
        };
        debug!(parent, entry = name, ino = attr.ino, "created file");
        Ok(attr)
    }

    pub fn mkdir(&self, parent: u64, name: &str, mode: u32) -> FsResult<NodeAttr> {
        let attr = self
            .tree()
            .insert(&self.inodes, parent, name, EntryKind::Directory, mode)?
            .attr();
        debug!(parent, entry = name, ino = attr.ino, "created directory");
        Ok(attr)
    }

    /// Remove `name` from `parent`; `is_dir` distinguishes rmdir from unlink
    pub fn remove(&self, parent: u64, name: &str, is_dir: bool) -> FsResult<()> {
        let policy = self.config.policy.rmdir;
        let removed = self.tree().remove(parent, name, is_dir, policy)?;
        debug!(parent, entry = name, ino = removed.inode(), "removed");
        Ok(())
    }

    /// Extended attribute lookup.
    ///
    /// The FUSE surface has no setxattr, so values only exist when seeded
    /// through [`MemFs::seed_xattr`].
    pub fn getxattr(&self, ino: u64, name: &str) -> FsResult<Vec<u8>> {
        self.with_node(ino, |node| node.xattr(name).map(<[u8]>::to_vec))
    }

    /// Pre-seed an extended attribute from the embedding program
    pub fn seed_xattr(&self, ino: u64, name: &str, value: &[u8]) -> FsResult<()> {
        self.with_node_mut(ino, |node| {
            node.set_xattr(name, value);
            Ok(())
        })
    }

    /// Snapshot of the directory's children, in insertion order
    pub fn read_dir_all(&self, ino: u64) -> FsResult<Vec<DirEntry>> {
        self.with_node(ino, Node::list_children)
    }

    /// Write `data` to a file.
    ///
    /// With the default `WriteMode::Replace` the whole content is replaced
    /// and `offset` is ignored. Content never grows past
    /// `policy.max_file_size`.
    pub fn write(&self, ino: u64, offset: u64, data: &[u8], read_only: bool) -> FsResult<usize> {
        if read_only {
            return Err(FsError::AccessDenied);
        }
        let policy = &self.config.policy;
        let written = self.with_node_mut(ino, |node| {
            if node.is_dir() {
                return Err(FsError::IsADirectory);
            }
            if policy.require_open_for_write && !node.is_open() {
                return Err(FsError::AccessDenied);
            }
            node.write(offset, data, policy.write_mode, policy.max_file_size)
        })?;
        debug!(ino, offset, written, "write");
        Ok(written)
    }

    pub fn read(&self, ino: u64, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        self.with_node(ino, |node| node.read(offset, size).map(<[u8]>::to_vec))
    }

    pub fn open(&self, ino: u64) -> FsResult<()> {
        self.with_node_mut(ino, |node| {
            node.open();
            Ok(())
        })
    }

    pub fn release(&self, ino: u64) -> FsResult<()> {
        self.with_node_mut(ino, |node| {
            node.release();
            Ok(())
        })
    }

    /// Number of live nodes, root included, counted by walking the tree
    pub fn node_count(&self) -> usize {
        let tree = self.tree();
        let mut count = 0;
        let mut stack = vec![&tree.root];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children());
        }
        count
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new(FsConfig::default())
    }
}
