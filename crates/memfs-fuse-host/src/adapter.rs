// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs FUSE adapter implementation
//!
//! Maps FUSE operations to `MemFs` calls. Core inode numbers are handed to
//! the kernel unchanged (the core root is inode 1, which is also
//! `FUSE_ROOT_ID`), and the file handle of an open file is its inode.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use std::ffi::OsStr;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::{c_int, EINVAL, ERANGE};
use memfs_core::{DirEntry, EntryKind, FsConfig, MemFs, NodeAttr};
use tracing::{debug, info};

use crate::errno::{component_name, errno_for, is_read_only};

const BLOCK_SIZE: u32 = 512;

/// memfs FUSE filesystem adapter
pub struct MemFsFuse {
    /// Core filesystem instance
    fs: Arc<MemFs>,
    /// TTL for attribute cache responses
    attr_ttl: Duration,
    /// TTL for directory entry cache responses
    entry_ttl: Duration,
    /// Owner reported for every node
    uid: u32,
    gid: u32,
    /// Timestamps are not tracked; every node reports the mount time
    mounted_at: SystemTime,
    /// Signalled once the session tears the filesystem down, whether by our
    /// own unmount or an external `fusermount -u`
    shutdown: Option<Sender<()>>,
}

impl MemFsFuse {
    /// Create a new FUSE adapter with the given configuration
    pub fn new(config: FsConfig) -> Self {
        Self::with_fs(Arc::new(MemFs::new(config)))
    }

    /// Serve an existing filesystem, e.g. one with pre-seeded nodes
    pub fn with_fs(fs: Arc<MemFs>) -> Self {
        let config = fs.config();
        let attr_ttl = Duration::from_millis(config.cache.attr_ttl_ms as u64);
        let entry_ttl = Duration::from_millis(config.cache.entry_ttl_ms as u64);
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let uid = config.uid.unwrap_or_else(|| unsafe { libc::getuid() });
        let gid = config.gid.unwrap_or_else(|| unsafe { libc::getgid() });
        Self {
            attr_ttl,
            entry_ttl,
            uid,
            gid,
            mounted_at: SystemTime::now(),
            fs,
            shutdown: None,
        }
    }

    /// Notify `tx` from `destroy`, when the kernel session has ended
    pub fn with_shutdown_notifier(mut self, tx: Sender<()>) -> Self {
        self.shutdown = Some(tx);
        self
    }

    pub fn fs(&self) -> &Arc<MemFs> {
        &self.fs
    }

    /// Convert core attributes to FUSE FileAttr
    fn file_attr(&self, attr: &NodeAttr) -> FileAttr {
        let kind = file_type(attr.kind);
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm: attr.perm(),
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

/// Entries a readdir call resuming at `offset` still has to emit, each paired
/// with the offset the kernel hands back to continue after it.
///
/// Offsets are 1-based positions in the snapshot, so 0 starts from the top.
fn readdir_window(entries: &[DirEntry], offset: i64) -> impl Iterator<Item = (i64, &DirEntry)> {
    let skip = usize::try_from(offset).unwrap_or(0);
    entries
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(i, entry)| (i as i64 + 1, entry))
}

/// How to answer a getxattr request for `value` given the caller's buffer
#[derive(Debug, PartialEq, Eq)]
enum XattrReply<'a> {
    /// Size query (`size == 0`): report the length only
    Size(u32),
    Data(&'a [u8]),
    /// Buffer too small, answered with ERANGE
    TooSmall,
}

fn xattr_reply(value: &[u8], size: u32) -> XattrReply<'_> {
    let Ok(len) = u32::try_from(value.len()) else {
        return XattrReply::TooSmall;
    };
    if size == 0 {
        XattrReply::Size(len)
    } else if len <= size {
        XattrReply::Data(value)
    } else {
        XattrReply::TooSmall
    }
}

impl fuser::Filesystem for MemFsFuse {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!(
            "memfs FUSE adapter initialized (attr_ttl={:?}, entry_ttl={:?})",
            self.attr_ttl, self.entry_ttl
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("memfs FUSE adapter destroyed ({} nodes dropped)", self.fs.node_count());
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match component_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.lookup(parent, name) {
            Ok(attr) => reply.entry(&self.entry_ttl, &self.file_attr(&attr), 0),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.fs.attr(ino) {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.file_attr(&attr)),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if uid.is_some() || gid.is_some() || size.is_some() || atime.is_some() || mtime.is_some()
        {
            debug!(
                ino,
                ?uid,
                ?gid,
                ?size,
                "setattr fields other than mode are not stored"
            );
        }
        match self.fs.setattr(ino, mode) {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.file_attr(&attr)),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match component_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.mkdir(parent, name, mode & !umask) {
            Ok(attr) => reply.entry(&self.entry_ttl, &self.file_attr(&attr), 0),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match component_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.create(parent, name, mode & !umask) {
            Ok(attr) => {
                let fuse_attr = self.file_attr(&attr);
                reply.created(&self.entry_ttl, &fuse_attr, 0, attr.ino, 0);
            }
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match component_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.remove(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match component_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.remove(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.fs.open(ino) {
            Ok(()) => reply.opened(ino, 0),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(EINVAL);
        }
        match self.fs.read(ino, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            return reply.error(EINVAL);
        }
        match self.fs.write(ino, offset as u64, data, is_read_only(flags)) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(ino) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.fs.read_dir_all(ino) {
            Ok(entries) => entries,
            Err(err) => return reply.error(errno_for(&err)),
        };
        for (next, entry) in readdir_window(&entries, offset) {
            if reply.add(entry.ino, next, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let Some(name) = name.to_str() else {
            return reply.error(libc::ENODATA);
        };
        match self.fs.getxattr(ino, name) {
            Ok(value) => match xattr_reply(&value, size) {
                XattrReply::Size(len) => reply.size(len),
                XattrReply::Data(data) => reply.data(data),
                XattrReply::TooSmall => reply.error(ERANGE),
            },
            Err(err) => reply.error(errno_for(&err)),
        }
    }
}
