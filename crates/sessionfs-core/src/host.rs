// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host filesystem seam for SessionFS Core
//!
//! All file content flows through the [`HostFs`] trait: the production
//! binding ([`NativeFs`]) uses the host filesystem, tests inject the
//! in-memory fake from [`crate::testing`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{SessError, SessResult};
use crate::types::{Fd, HandleId, OpenFlags, OwnerPid};

/// Lowest descriptor number handed out per owning process; the standard
/// streams are taken in any real process table.
const FIRST_FD: i32 = 3;

/// An opened host file: the core-side handle plus the descriptor number
/// installed in the owner's table when one was requested.
#[derive(Clone, Copy, Debug)]
pub struct OpenedFile {
    pub handle: HandleId,
    pub fd: Option<Fd>,
}

/// Host filesystem operations used by the session core.
///
/// `bulk_copy` streams whole-file content in fixed-size slabs; callers
/// guarantee it is never run concurrently against the same destination
/// (the session lock serializes copy-on-open against write-back).
#[cfg_attr(test, mockall::automock)]
pub trait HostFs: Send + Sync {
    /// Open or create `path` with host semantics. When `want_fd` names an
    /// owning process, a descriptor number is allocated in that process's
    /// table and bound to the handle before returning.
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
        want_fd: Option<OwnerPid>,
    ) -> SessResult<OpenedFile>;

    /// Close a handle previously returned by [`HostFs::open`].
    fn close(&self, handle: HandleId) -> SessResult<()>;

    fn read_at(&self, handle: HandleId, offset: u64, buf: &mut [u8]) -> SessResult<usize>;

    fn write_at(&self, handle: HandleId, offset: u64, buf: &[u8]) -> SessResult<usize>;

    /// Truncate or extend the file behind `handle` to `len` bytes.
    fn set_len(&self, handle: HandleId, len: u64) -> SessResult<()>;

    /// Stream the entire content of `src` over `dst` from offset 0,
    /// truncating `dst` to the copied length. Reads until EOF; aborts on
    /// the first read or write error and returns it.
    fn bulk_copy(&self, src: HandleId, dst: HandleId, slab: usize) -> SessResult<()> {
        let mut buf = vec![0u8; slab.max(1)];
        let mut offset = 0u64;
        loop {
            let read = self.read_at(src, offset, &mut buf)?;
            if read == 0 {
                break;
            }
            let mut written = 0;
            while written < read {
                let n = self.write_at(dst, offset + written as u64, &buf[written..read])?;
                if n == 0 {
                    return Err(SessError::Io(io::ErrorKind::WriteZero.into()));
                }
                written += n;
            }
            offset += read as u64;
        }
        self.set_len(dst, offset)
    }
}

/// Production [`HostFs`] backed by the host filesystem.
///
/// Descriptor numbers are allocated per owning process, monotonically and
/// without reuse within a run, which keeps `(pid, fd)` pairs unique
/// without owning the real process descriptor table (that belongs to the
/// external shim).
pub struct NativeFs {
    next_handle: AtomicU64,
    files: Mutex<HashMap<HandleId, File>>,
    fd_tables: Mutex<HashMap<OwnerPid, i32>>,
}

impl NativeFs {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            fd_tables: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_fd(&self, pid: OwnerPid) -> Fd {
        let mut tables = self.fd_tables.lock().unwrap();
        let next = tables.entry(pid).or_insert(FIRST_FD);
        let fd = Fd::new(*next);
        *next += 1;
        fd
    }
}

impl Default for NativeFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFs for NativeFs {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
        want_fd: Option<OwnerPid>,
    ) -> SessResult<OpenedFile> {
        let mut options = OpenOptions::new();
        options.read(flags.read_intent()).write(flags.write_intent());
        if flags.has_excl() {
            options.create_new(true);
        } else if flags.has_create() {
            options.create(true);
        }
        if flags.has_trunc() {
            options.truncate(true);
        }
        if flags.has_append() {
            options.append(true);
        }
        options.mode(mode);

        let file = options.open(path)?;
        let handle = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files.lock().unwrap().insert(handle, file);
        let fd = want_fd.map(|pid| self.alloc_fd(pid));
        Ok(OpenedFile { handle, fd })
    }

    fn close(&self, handle: HandleId) -> SessResult<()> {
        self.files
            .lock()
            .unwrap()
            .remove(&handle)
            .map(drop)
            .ok_or(SessError::BadFileDescriptor)
    }

    fn read_at(&self, handle: HandleId, offset: u64, buf: &mut [u8]) -> SessResult<usize> {
        let files = self.files.lock().unwrap();
        let file = files.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        Ok(file.read_at(buf, offset)?)
    }

    fn write_at(&self, handle: HandleId, offset: u64, buf: &[u8]) -> SessResult<usize> {
        let files = self.files.lock().unwrap();
        let file = files.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        Ok(file.write_at(buf, offset)?)
    }

    fn set_len(&self, handle: HandleId, len: u64) -> SessResult<()> {
        let files = self.files.lock().unwrap();
        let file = files.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        Ok(file.set_len(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::{O_CREAT, O_EXCL, O_RDWR};

    fn rdwr_create() -> OpenFlags {
        OpenFlags::new(O_RDWR | O_CREAT)
    }

    #[test]
    fn test_open_read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = dir.path().join("data.bin");

        let opened = fs.open(&path, rdwr_create(), 0o644, None).unwrap();
        assert!(opened.fd.is_none());

        assert_eq!(fs.write_at(opened.handle, 0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read_at(opened.handle, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        fs.close(opened.handle).unwrap();
        assert!(matches!(
            fs.read_at(opened.handle, 0, &mut buf),
            Err(SessError::BadFileDescriptor)
        ));
    }

    #[test]
    fn test_excl_open_fails_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"x").unwrap();

        let err = fs
            .open(&path, OpenFlags::new(O_RDWR | O_CREAT | O_EXCL), 0o644, None)
            .unwrap_err();
        assert!(matches!(err, SessError::Io(_)));
    }

    #[test]
    fn test_fd_allocation_is_per_owner_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let path = dir.path().join("data.bin");

        let a1 = fs
            .open(&path, rdwr_create(), 0o644, Some(OwnerPid::new(100)))
            .unwrap();
        let a2 = fs
            .open(&path, rdwr_create(), 0o644, Some(OwnerPid::new(100)))
            .unwrap();
        let b1 = fs
            .open(&path, rdwr_create(), 0o644, Some(OwnerPid::new(200)))
            .unwrap();

        assert_eq!(a1.fd.unwrap().as_raw(), 3);
        assert_eq!(a2.fd.unwrap().as_raw(), 4);
        assert_eq!(b1.fd.unwrap().as_raw(), 3);
    }

    #[test]
    fn test_bulk_copy_truncates_longer_destination() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let src_path = dir.path().join("src");
        let dst_path = dir.path().join("dst");
        std::fs::write(&src_path, b"short").unwrap();
        std::fs::write(&dst_path, b"much longer pre-existing content").unwrap();

        let src = fs.open(&src_path, OpenFlags::new(O_RDWR), 0o644, None).unwrap();
        let dst = fs.open(&dst_path, OpenFlags::new(O_RDWR), 0o644, None).unwrap();

        fs.bulk_copy(src.handle, dst.handle, 512).unwrap();
        assert_eq!(std::fs::read(&dst_path).unwrap(), b"short");
    }

    #[test]
    fn test_bulk_copy_spans_multiple_slabs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFs::new();
        let src_path = dir.path().join("src");
        let dst_path = dir.path().join("dst");
        // not a multiple of the slab size
        let content: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src_path, &content).unwrap();

        let src = fs.open(&src_path, OpenFlags::new(O_RDWR), 0o644, None).unwrap();
        let dst = fs.open(&dst_path, rdwr_create(), 0o644, None).unwrap();

        fs.bulk_copy(src.handle, dst.handle, 512).unwrap();
        assert_eq!(std::fs::read(&dst_path).unwrap(), content);
    }
}
