// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory host filesystem for tests

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{SessError, SessResult};
use crate::host::{HostFs, OpenedFile};
use crate::types::{Fd, HandleId, OpenFlags, OwnerPid};

const FIRST_FD: i32 = 3;

struct MemHandle {
    content: Arc<Mutex<Vec<u8>>>,
    readable: bool,
    writable: bool,
    append: bool,
}

/// In-memory [`HostFs`] implementation.
///
/// Content lives in shared buffers keyed by pathname, so a handle keeps
/// working after the path is forgotten, mirroring host unlink semantics.
/// Handles the core intentionally leaves open (dead-owner reaping) are
/// observable through [`MemFs::open_handle_count`].
pub struct MemFs {
    next_handle: AtomicU64,
    files: Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>,
    handles: Mutex<HashMap<HandleId, MemHandle>>,
    fd_tables: Mutex<HashMap<OwnerPid, i32>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            fd_tables: Mutex::new(HashMap::new()),
        }
    }

    /// Seed or overwrite a file without going through `open`.
    pub fn set_contents(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        let mut files = self.files.lock().unwrap();
        let entry = files
            .entry(path.into())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        *entry.lock().unwrap() = contents.to_vec();
    }

    /// Current content of a file, if it exists.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|content| content.lock().unwrap().clone())
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    /// Every known pathname, for tests that need to locate incarnation
    /// files.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// First pathname containing `fragment`.
    pub fn find_path_containing(&self, fragment: &str) -> Option<PathBuf> {
        self.paths()
            .into_iter()
            .find(|path| path.to_string_lossy().contains(fragment))
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    fn alloc_fd(&self, pid: OwnerPid) -> Fd {
        let mut tables = self.fd_tables.lock().unwrap();
        let next = tables.entry(pid).or_insert(FIRST_FD);
        let fd = Fd::new(*next);
        *next += 1;
        fd
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFs for MemFs {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        _mode: u32,
        want_fd: Option<OwnerPid>,
    ) -> SessResult<OpenedFile> {
        let content = {
            let mut files = self.files.lock().unwrap();
            match files.get(path) {
                Some(existing) => {
                    if flags.has_create() && flags.has_excl() {
                        return Err(SessError::Io(io::Error::from_raw_os_error(libc::EEXIST)));
                    }
                    Arc::clone(existing)
                },
                None => {
                    if !flags.has_create() {
                        return Err(SessError::Io(io::Error::from_raw_os_error(libc::ENOENT)));
                    }
                    let created = Arc::new(Mutex::new(Vec::new()));
                    files.insert(path.to_path_buf(), Arc::clone(&created));
                    created
                },
            }
        };
        if flags.has_trunc() && flags.write_intent() {
            content.lock().unwrap().clear();
        }

        let handle = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.lock().unwrap().insert(
            handle,
            MemHandle {
                content,
                readable: flags.read_intent(),
                writable: flags.write_intent(),
                append: flags.has_append(),
            },
        );
        let fd = want_fd.map(|pid| self.alloc_fd(pid));
        Ok(OpenedFile { handle, fd })
    }

    fn close(&self, handle: HandleId) -> SessResult<()> {
        self.handles
            .lock()
            .unwrap()
            .remove(&handle)
            .map(drop)
            .ok_or(SessError::BadFileDescriptor)
    }

    fn read_at(&self, handle: HandleId, offset: u64, buf: &mut [u8]) -> SessResult<usize> {
        let handles = self.handles.lock().unwrap();
        let entry = handles.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        if !entry.readable {
            return Err(SessError::BadFileDescriptor);
        }
        let content = entry.content.lock().unwrap();

        let start = offset as usize;
        if start >= content.len() {
            return Ok(0);
        }
        let end = std::cmp::min(start + buf.len(), content.len());
        let count = end - start;
        buf[..count].copy_from_slice(&content[start..end]);
        Ok(count)
    }

    fn write_at(&self, handle: HandleId, offset: u64, buf: &[u8]) -> SessResult<usize> {
        let handles = self.handles.lock().unwrap();
        let entry = handles.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        if !entry.writable {
            return Err(SessError::BadFileDescriptor);
        }
        let mut content = entry.content.lock().unwrap();

        let start = if entry.append {
            content.len()
        } else {
            offset as usize
        };
        let end = start + buf.len();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&self, handle: HandleId, len: u64) -> SessResult<()> {
        let handles = self.handles.lock().unwrap();
        let entry = handles.get(&handle).ok_or(SessError::BadFileDescriptor)?;
        if !entry.writable {
            return Err(SessError::BadFileDescriptor);
        }
        entry.content.lock().unwrap().resize(len as usize, 0);
        Ok(())
    }
}
