// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Translation of core errors and raw request names into kernel terms

use std::ffi::OsStr;

use libc::{
    c_int, EACCES, EEXIST, EFBIG, EINVAL, EISDIR, ENAMETOOLONG, ENOENT, ENOSPC, ENOTDIR,
    ENOTEMPTY,
};
use memfs_core::FsError;

/// Maximum single path component length
pub const NAME_MAX: usize = 255;

/// errno reported to the kernel for a core error
pub fn errno_for(err: &FsError) -> c_int {
    match err {
        FsError::NotFound => ENOENT,
        FsError::AlreadyExists => EEXIST,
        FsError::AccessDenied => EACCES,
        FsError::InvalidArgument => EINVAL,
        FsError::NotADirectory => ENOTDIR,
        FsError::IsADirectory => EISDIR,
        FsError::NotEmpty => ENOTEMPTY,
        FsError::NoData => libc::ENODATA,
        FsError::FileTooLarge => EFBIG,
        FsError::NoSpace => ENOSPC,
    }
}

/// Check a single path component before it reaches the core.
///
/// Node names are `String`s, so names that are not valid UTF-8 are refused.
pub fn component_name(name: &OsStr) -> Result<&str, c_int> {
    if name.len() > NAME_MAX {
        return Err(ENAMETOOLONG);
    }
    match name.to_str() {
        Some(name) if !name.is_empty() && !name.contains('/') => Ok(name),
        _ => Err(EINVAL),
    }
}

/// Whether the open flags of a write request only allow reading
pub fn is_read_only(flags: i32) -> bool {
    flags & libc::O_ACCMODE == libc::O_RDONLY
}
