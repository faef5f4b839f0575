// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tree nodes and the algorithms that operate on them
//!
//! Ownership runs strictly from parent to child: a directory owns its
//! children outright, and nothing points back up the tree. Nodes never hold
//! the inode allocator either; it is borrowed for the duration of
//! [`Node::insert_child`] only.

use std::collections::{BTreeMap, HashMap};

use crate::config::{RmdirPolicy, WriteMode};
use crate::error::{FsError, FsResult};
use crate::inode::InodeAllocator;
use crate::types::{DirEntry, EntryKind, NodeAttr, ROOT_INODE, S_IFMT};

/// Payload of a node; which variant is present follows the mode's type bits
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File {
        data: Vec<u8>,
    },
    /// Children keyed by inode. Inodes only grow, so key order is also
    /// insertion order, which is the listing order.
    Directory {
        children: BTreeMap<u64, Node>,
        names: HashMap<String, u64>,
    },
}

/// A single file or directory
#[derive(Clone, Debug)]
pub struct Node {
    inode: u64,
    name: String,
    mode: u32,
    kind: NodeKind,
    xattrs: HashMap<String, Vec<u8>>,
    open_handles: u32,
}

impl Node {
    /// Build a detached node; the type bits of `mode` select file or directory
    pub fn new(inode: u64, name: &str, mode: u32) -> Self {
        let kind = match EntryKind::from_mode(mode) {
            EntryKind::Directory => NodeKind::Directory {
                children: BTreeMap::new(),
                names: HashMap::new(),
            },
            EntryKind::File => NodeKind::File { data: Vec::new() },
        };
        Self {
            inode,
            name: name.to_string(),
            mode: EntryKind::from_mode(mode).type_bits() | (mode & 0o7777),
            kind,
            xattrs: HashMap::new(),
            open_handles: 0,
        }
    }

    /// The root directory: inode 1, no name
    pub fn root(perm: u32) -> Self {
        Self::new(ROOT_INODE, "", EntryKind::Directory.type_bits() | perm)
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::File { .. } => EntryKind::File,
            NodeKind::Directory { .. } => EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// File content, `None` for directories
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::File { data } => Some(data),
            NodeKind::Directory { .. } => None,
        }
    }

    /// Immediate children in insertion order; empty for files
    pub fn children(&self) -> impl Iterator<Item = &Node> + '_ {
        let children = match &self.kind {
            NodeKind::Directory { children, .. } => Some(children.values()),
            NodeKind::File { .. } => None,
        };
        children.into_iter().flatten()
    }

    pub fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Directory { children, .. } => children.len(),
            NodeKind::File { .. } => 0,
        }
    }

    /// Immediate child by inode
    pub fn child(&self, ino: u64) -> Option<&Node> {
        match &self.kind {
            NodeKind::Directory { children, .. } => children.get(&ino),
            NodeKind::File { .. } => None,
        }
    }

    pub fn child_mut(&mut self, ino: u64) -> Option<&mut Node> {
        match &mut self.kind {
            NodeKind::Directory { children, .. } => children.get_mut(&ino),
            NodeKind::File { .. } => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_handles > 0
    }

    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            ino: self.inode,
            name: self.name.clone(),
            mode: self.mode,
            kind: self.entry_kind(),
            size: self.data().map_or(0, |data| data.len() as u64),
        }
    }

    /// Locate a node anywhere in this subtree by walking it depth first.
    ///
    /// Costs time proportional to the subtree size; `MemFs` resolves inodes
    /// through its parent index instead.
    pub fn find(&self, ino: u64) -> Option<&Node> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.inode == ino {
                return Some(node);
            }
            stack.extend(node.children());
        }
        None
    }

    /// Single-level lookup among the immediate children.
    ///
    /// Multi-component paths are resolved by the kernel through repeated
    /// lookups, so subdirectories are never searched.
    pub fn lookup(&self, name: &str) -> FsResult<&Node> {
        let NodeKind::Directory { children, names } = &self.kind else {
            return Err(FsError::NotADirectory);
        };
        names
            .get(name)
            .and_then(|ino| children.get(ino))
            .ok_or(FsError::NotFound)
    }

    /// Create a child of the given kind, rejecting duplicate names before an
    /// inode is spent on it.
    pub fn insert_child(
        &mut self,
        inodes: &InodeAllocator,
        name: &str,
        kind: EntryKind,
        perm: u32,
    ) -> FsResult<&mut Node> {
        let parent = self.inode;
        let NodeKind::Directory { children, names } = &mut self.kind else {
            return Err(FsError::NotADirectory);
        };
        if names.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let ino = inodes.next(parent, name);
        names.insert(name.to_string(), ino);
        let node = Node::new(ino, name, kind.type_bits() | (perm & 0o7777));
        Ok(children.entry(ino).or_insert(node))
    }

    /// Detach the child called `name`, keeping the order of its siblings.
    pub fn remove_child(
        &mut self,
        name: &str,
        is_dir_request: bool,
        policy: RmdirPolicy,
    ) -> FsResult<Node> {
        let NodeKind::Directory { children, names } = &mut self.kind else {
            return Err(FsError::NotADirectory);
        };
        let ino = *names.get(name).ok_or(FsError::NotFound)?;
        let target = children.get(&ino).ok_or(FsError::NotFound)?;

        if is_dir_request {
            if !target.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if name.ends_with('.') {
                return Err(FsError::InvalidArgument);
            }
            if policy == RmdirPolicy::RequireEmpty && target.child_count() > 0 {
                return Err(FsError::NotEmpty);
            }
        } else if target.is_dir() {
            return Err(FsError::IsADirectory);
        }

        names.remove(name);
        children.remove(&ino).ok_or(FsError::NotFound)
    }

    /// Listing of the immediate children in insertion order
    pub fn list_children(&self) -> FsResult<Vec<DirEntry>> {
        let NodeKind::Directory { children, .. } = &self.kind else {
            return Err(FsError::NotADirectory);
        };
        Ok(children
            .values()
            .map(|child| DirEntry {
                ino: child.inode,
                kind: child.entry_kind(),
                name: child.name.clone(),
            })
            .collect())
    }

    /// Apply a new mode unless it would change the node's type.
    ///
    /// Returns `false` when the mode was refused. Modes without type bits
    /// only touch the permission bits.
    pub fn set_mode(&mut self, mode: u32) -> bool {
        let current = self.entry_kind().type_bits();
        let requested = mode & S_IFMT;
        if requested != 0 && requested != current {
            return false;
        }
        self.mode = current | (mode & 0o7777);
        true
    }

    /// Store `data` according to `mode`, returning the number of bytes taken.
    ///
    /// Content may never grow past `max_size` bytes. Memory for the new
    /// content is reserved up front, so an allocation failure surfaces as
    /// `NoSpace` with the old content intact.
    pub fn write(
        &mut self,
        offset: u64,
        data: &[u8],
        mode: WriteMode,
        max_size: u64,
    ) -> FsResult<usize> {
        let NodeKind::File { data: content } = &mut self.kind else {
            return Err(FsError::IsADirectory);
        };

        let start = match mode {
            WriteMode::Replace => 0,
            WriteMode::Offset => offset,
        };
        let end = start
            .checked_add(data.len() as u64)
            .filter(|end| *end <= max_size)
            .ok_or(FsError::FileTooLarge)?;
        let start = usize::try_from(start).map_err(|_| FsError::FileTooLarge)?;
        let end = usize::try_from(end).map_err(|_| FsError::FileTooLarge)?;

        match mode {
            WriteMode::Replace => {
                let mut replacement = Vec::new();
                replacement.try_reserve_exact(end).map_err(|_| FsError::NoSpace)?;
                replacement.extend_from_slice(data);
                *content = replacement;
            }
            WriteMode::Offset => {
                if content.len() < end {
                    content
                        .try_reserve(end - content.len())
                        .map_err(|_| FsError::NoSpace)?;
                    content.resize(end, 0);
                }
                content[start..end].copy_from_slice(data);
            }
        }
        Ok(data.len())
    }

    /// Up to `size` bytes starting at `offset`; empty past the end
    pub fn read(&self, offset: u64, size: usize) -> FsResult<&[u8]> {
        let NodeKind::File { data } = &self.kind else {
            return Err(FsError::IsADirectory);
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(size).min(data.len());
        Ok(&data[start..end])
    }

    pub fn xattr(&self, name: &str) -> FsResult<&[u8]> {
        self.xattrs.get(name).map(Vec::as_slice).ok_or(FsError::NoData)
    }

    pub fn set_xattr(&mut self, name: &str, value: &[u8]) {
        self.xattrs.insert(name.to_string(), value.to_vec());
    }

    pub fn open(&mut self) {
        self.open_handles = self.open_handles.saturating_add(1);
    }

    pub fn release(&mut self) {
        self.open_handles = self.open_handles.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_SIZE: u64 = 1 << 20;

    fn dir_with(names: &[(&str, EntryKind)]) -> (Node, InodeAllocator) {
        let inodes = InodeAllocator::new();
        let mut root = Node::root(0o755);
        for (name, kind) in names {
            root.insert_child(&inodes, name, *kind, 0o644).unwrap();
        }
        (root, inodes)
    }

    #[test]
    fn root_is_directory_with_inode_one() {
        let root = Node::root(0o555);
        assert_eq!(root.inode(), ROOT_INODE);
        assert!(root.is_dir());
        assert_eq!(root.name(), "");
        assert_eq!(root.mode(), libc::S_IFDIR as u32 | 0o555);
        assert!(root.data().is_none());
    }

    #[test]
    fn mode_type_bits_select_the_payload() {
        let file = Node::new(7, "f", libc::S_IFREG as u32 | 0o600);
        assert!(!file.is_dir());
        assert_eq!(file.data(), Some(&b""[..]));
        assert_eq!(file.child_count(), 0);

        let dir = Node::new(8, "d", libc::S_IFDIR as u32 | 0o700);
        assert!(dir.is_dir());
        assert!(dir.data().is_none());
    }

    #[test]
    fn lookup_is_single_level() {
        let (mut root, inodes) = dir_with(&[("sub", EntryKind::Directory)]);
        let sub_ino = root.lookup("sub").unwrap().inode();
        root.child_mut(sub_ino)
            .unwrap()
            .insert_child(&inodes, "deep", EntryKind::File, 0o644)
            .unwrap();

        assert_eq!(root.lookup("deep").unwrap_err(), FsError::NotFound);
        assert!(root.find(sub_ino).unwrap().lookup("deep").is_ok());
    }

    #[test]
    fn lookup_inside_a_file_fails() {
        let (root, _) = dir_with(&[("f", EntryKind::File)]);
        let file = root.lookup("f").unwrap();
        assert_eq!(file.lookup("x").unwrap_err(), FsError::NotADirectory);
    }

    #[test]
    fn duplicate_names_are_rejected_without_spending_an_inode() {
        let (mut root, inodes) = dir_with(&[("f", EntryKind::File)]);
        let before = inodes.last();
        let err = root.insert_child(&inodes, "f", EntryKind::Directory, 0o755).unwrap_err();
        assert_eq!(err, FsError::AlreadyExists);
        assert_eq!(inodes.last(), before);
        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn insert_into_file_is_not_a_directory() {
        let (mut root, inodes) = dir_with(&[("f", EntryKind::File)]);
        let ino = root.lookup("f").unwrap().inode();
        let file = root.child_mut(ino).unwrap();
        let err = file.insert_child(&inodes, "x", EntryKind::File, 0o644).unwrap_err();
        assert_eq!(err, FsError::NotADirectory);
    }

    #[test]
    fn remove_keeps_sibling_order() {
        let (mut root, _) = dir_with(&[
            ("a", EntryKind::File),
            ("b", EntryKind::File),
            ("c", EntryKind::File),
        ]);
        let removed = root.remove_child("b", false, RmdirPolicy::RequireEmpty).unwrap();
        assert_eq!(removed.name(), "b");
        let names: Vec<_> = root.children().map(Node::name).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn remove_checks_request_kind_against_target() {
        let (mut root, _) = dir_with(&[("f", EntryKind::File), ("d", EntryKind::Directory)]);
        assert_eq!(
            root.remove_child("f", true, RmdirPolicy::RequireEmpty).unwrap_err(),
            FsError::NotADirectory
        );
        assert_eq!(
            root.remove_child("d", false, RmdirPolicy::RequireEmpty).unwrap_err(),
            FsError::IsADirectory
        );
        assert_eq!(
            root.remove_child("missing", false, RmdirPolicy::RequireEmpty).unwrap_err(),
            FsError::NotFound
        );
        assert_eq!(root.child_count(), 2);
    }

    #[test]
    fn trailing_dot_directory_removal_is_invalid() {
        let (mut root, _) = dir_with(&[("odd.", EntryKind::Directory)]);
        assert_eq!(
            root.remove_child("odd.", true, RmdirPolicy::RequireEmpty).unwrap_err(),
            FsError::InvalidArgument
        );
        // the same name as a file is removable through unlink
        let (mut root, _) = dir_with(&[("odd.", EntryKind::File)]);
        assert!(root.remove_child("odd.", false, RmdirPolicy::RequireEmpty).is_ok());
    }

    #[test]
    fn non_empty_directory_follows_policy() {
        let (mut root, inodes) = dir_with(&[("d", EntryKind::Directory)]);
        let ino = root.lookup("d").unwrap().inode();
        root.child_mut(ino)
            .unwrap()
            .insert_child(&inodes, "inner", EntryKind::File, 0o644)
            .unwrap();

        assert_eq!(
            root.remove_child("d", true, RmdirPolicy::RequireEmpty).unwrap_err(),
            FsError::NotEmpty
        );
        let removed = root.remove_child("d", true, RmdirPolicy::Recursive).unwrap();
        assert_eq!(removed.child_count(), 1);
        assert!(root.find(ino).is_none());
    }

    #[test]
    fn list_children_reports_kinds_in_insertion_order() {
        let (root, _) = dir_with(&[
            ("z", EntryKind::File),
            ("a", EntryKind::Directory),
            ("m", EntryKind::File),
        ]);
        let entries = root.list_children().unwrap();
        let summary: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            [
                ("z", EntryKind::File),
                ("a", EntryKind::Directory),
                ("m", EntryKind::File)
            ]
        );
        assert_eq!(entries[0].ino, 2);
    }

    #[test]
    fn set_mode_refuses_type_changes() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        assert!(!file.set_mode(libc::S_IFIFO as u32 | 0o600));
        assert!(!file.set_mode(libc::S_IFDIR as u32 | 0o700));
        assert_eq!(file.mode(), libc::S_IFREG as u32 | 0o644);

        assert!(file.set_mode(0o600));
        assert_eq!(file.mode(), libc::S_IFREG as u32 | 0o600);
        assert!(file.set_mode(libc::S_IFREG as u32 | 0o400));
        assert_eq!(file.mode(), libc::S_IFREG as u32 | 0o400);
    }

    #[test]
    fn replace_write_discards_previous_content() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.write(0, b"a much longer body", WriteMode::Replace, MAX_SIZE).unwrap();
        assert_eq!(file.write(9, b"abc", WriteMode::Replace, MAX_SIZE).unwrap(), 3);
        assert_eq!(file.data().unwrap(), b"abc");
    }

    #[test]
    fn offset_write_patches_and_zero_fills() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.write(0, b"hello world", WriteMode::Offset, MAX_SIZE).unwrap();
        file.write(6, b"there", WriteMode::Offset, MAX_SIZE).unwrap();
        assert_eq!(file.data().unwrap(), b"hello there");

        file.write(13, b"!", WriteMode::Offset, MAX_SIZE).unwrap();
        assert_eq!(file.data().unwrap(), b"hello there\0\0!");
    }

    #[test]
    fn read_clamps_to_content() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.write(0, b"0123456789", WriteMode::Replace, MAX_SIZE).unwrap();
        assert_eq!(file.read(2, 3).unwrap(), b"234");
        assert_eq!(file.read(8, 100).unwrap(), b"89");
        assert!(file.read(50, 10).unwrap().is_empty());
        assert!(file.read(u64::MAX, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn directories_have_no_content() {
        let mut dir = Node::new(2, "d", libc::S_IFDIR as u32 | 0o755);
        assert_eq!(
            dir.write(0, b"x", WriteMode::Replace, MAX_SIZE).unwrap_err(),
            FsError::IsADirectory
        );
        assert_eq!(dir.read(0, 1).unwrap_err(), FsError::IsADirectory);
    }

    #[test]
    fn open_count_saturates() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.release();
        assert!(!file.is_open());
        file.open();
        file.open();
        file.release();
        assert!(file.is_open());
        file.release();
        assert!(!file.is_open());
    }

    #[test]
    fn offset_write_past_size_limit_is_rejected() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.write(0, b"keep", WriteMode::Offset, MAX_SIZE).unwrap();

        let err = file.write((i64::MAX - 1) as u64, b"x", WriteMode::Offset, MAX_SIZE);
        assert_eq!(err.unwrap_err(), FsError::FileTooLarge);
        let err = file.write(u64::MAX, b"x", WriteMode::Offset, u64::MAX);
        assert_eq!(err.unwrap_err(), FsError::FileTooLarge);
        assert_eq!(file.data().unwrap(), b"keep");

        // ending exactly on the limit is fine
        file.write(MAX_SIZE - 1, b"x", WriteMode::Offset, MAX_SIZE).unwrap();
        assert_eq!(file.attr().size, MAX_SIZE);
    }

    #[test]
    fn replace_write_larger_than_limit_is_rejected() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        file.write(0, b"keep", WriteMode::Replace, 8).unwrap();
        assert_eq!(
            file.write(0, b"123456789", WriteMode::Replace, 8).unwrap_err(),
            FsError::FileTooLarge
        );
        assert_eq!(file.data().unwrap(), b"keep");
    }

    #[test]
    fn unsatisfiable_allocation_is_an_error() {
        let mut file = Node::new(2, "f", libc::S_IFREG as u32 | 0o644);
        let err = file.write((isize::MAX as u64) - 1, b"x", WriteMode::Offset, u64::MAX);
        assert_eq!(err.unwrap_err(), FsError::NoSpace);
        assert_eq!(file.data().unwrap(), b"");
    }

    #[test]
    fn children_are_keyed_by_inode() {
        let (mut root, _) = dir_with(&[("a", EntryKind::File), ("b", EntryKind::Directory)]);
        let b = root.lookup("b").unwrap().inode();
        assert_eq!(root.child(b).unwrap().name(), "b");
        assert!(root.child_mut(b).unwrap().is_dir());
        assert!(root.child(999).is_none());
        assert!(root.lookup("a").unwrap().child(b).is_none());
    }
}
