// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for SessionFS

use libc::{O_ACCMODE, O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};

/// Flag bit that opts an open into session semantics.
///
/// Shared with the control plane schema; the core strips it before any
/// host open.
pub const O_SESS: i32 = sessionfs_proto::O_SESS as i32;

/// Copy-on-open result carried by an incarnation: 0, or a negative errno.
pub type IncarnationStatus = i32;

/// Status of an incarnation whose copy-on-open succeeded.
pub const STATUS_VALID: IncarnationStatus = 0;

/// Process identifier of an incarnation owner.
///
/// All lifecycle operations require the owning pid, which the external
/// shim supplies from the calling process's context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerPid(pub(crate) u32);

impl OwnerPid {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for OwnerPid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor number as seen by the owning process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fd(pub(crate) i32);

impl Fd {
    pub fn new(fd: i32) -> Self {
        Self(fd)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifier into a [`HostFs`](crate::host::HostFs)
/// implementation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Host open flags plus the session opt-in bit.
///
/// A thin wrapper over the libc flag bits with the transforms the
/// lifecycle engine needs: stripping the session bit, forcing read-write
/// intent on the original, and forcing creation of the incarnation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub fn new(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn has_session(self) -> bool {
        self.0 & O_SESS != 0
    }

    pub fn strip_session(self) -> Self {
        Self(self.0 & !O_SESS)
    }

    /// Replace the caller's read/write intent with `O_RDWR`; the original
    /// must stay writable for the eventual write-back and readable for
    /// copy-on-open.
    pub fn force_rdwr(self) -> Self {
        Self((self.0 & !O_ACCMODE) | O_RDWR)
    }

    pub fn with_create(self) -> Self {
        Self(self.0 | O_CREAT)
    }

    pub fn has_create(self) -> bool {
        self.0 & O_CREAT != 0
    }

    pub fn has_excl(self) -> bool {
        self.0 & O_EXCL != 0
    }

    pub fn has_trunc(self) -> bool {
        self.0 & O_TRUNC != 0
    }

    pub fn has_append(self) -> bool {
        self.0 & O_APPEND != 0
    }

    pub fn read_intent(self) -> bool {
        matches!(self.0 & O_ACCMODE, O_RDONLY | O_RDWR)
    }

    pub fn write_intent(self) -> bool {
        matches!(self.0 & O_ACCMODE, O_WRONLY | O_RDWR)
    }
}
