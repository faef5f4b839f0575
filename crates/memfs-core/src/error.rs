// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the memfs core
//!
//! Every failing handler reports exactly one of these. Nothing is retried:
//! all operations are in-memory and either succeed or fail immediately.
//!
//! `MemFs::setattr` is the one deliberate exception to "every rejection is an
//! error": a mode change towards an irregular file type is logged and
//! ignored rather than surfaced.

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no such attribute")]
    NoData,
    #[error("file too large")]
    FileTooLarge,
    #[error("out of memory for file content")]
    NoSpace,
}

pub type FsResult<T> = Result<T, FsError>;
