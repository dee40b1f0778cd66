// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for SessionFS Core

use std::io;

/// Core session manager error type
#[derive(thiserror::Error, Debug)]
pub enum SessError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("out of memory")]
    OutOfMemory,
    #[error("owner process is gone")]
    OwnerGone,
    #[error("core busy: {active} active incarnations")]
    Busy {
        /// Incarnations still live at the failed shutdown attempt.
        active: usize,
    },
    /// Stale session observed during creation. Surfaced from open only;
    /// the caller may retry.
    #[error("stale session, retry")]
    Retry,
    #[error("core is disabled")]
    Disabled,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SessError {
    /// Negative errno representation, as carried by the incarnation status
    /// field and the control plane.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument => -libc::EINVAL,
            Self::BadFileDescriptor => -libc::EBADF,
            Self::OutOfMemory => -libc::ENOMEM,
            Self::OwnerGone => -libc::ESRCH,
            Self::Busy { .. } | Self::Retry => -libc::EAGAIN,
            Self::Disabled => -libc::ENODEV,
            Self::Io(err) => -err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type SessResult<T> = Result<T, SessError>;
