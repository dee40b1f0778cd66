// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session and incarnation records

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::error::SessError;
use crate::host::HostFs;
use crate::types::{Fd, HandleId, IncarnationStatus, OwnerPid};

/// One process's private copy of an original file.
///
/// Effectively immutable after publication; removal happens under the
/// owning session's write lock. The record owns its host handle and
/// closes it on drop, unless the owning process died first (the host
/// reclaims descriptors with the process, so the handle is already gone).
pub struct Incarnation {
    owner: OwnerPid,
    fd: Fd,
    handle: HandleId,
    pathname: PathBuf,
    status: IncarnationStatus,
    handle_released: AtomicBool,
    fs: Arc<dyn HostFs>,
}

impl Incarnation {
    pub(crate) fn new(
        owner: OwnerPid,
        fd: Fd,
        handle: HandleId,
        pathname: PathBuf,
        status: IncarnationStatus,
        fs: Arc<dyn HostFs>,
    ) -> Self {
        Self {
            owner,
            fd,
            handle,
            pathname,
            status,
            handle_released: AtomicBool::new(false),
            fs,
        }
    }

    pub fn owner(&self) -> OwnerPid {
        self.owner
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// 0 when copy-on-open succeeded; a negative errno marks the
    /// incarnation corrupt, and closing it never writes back.
    pub fn status(&self) -> IncarnationStatus {
        self.status
    }

    pub fn is_corrupt(&self) -> bool {
        self.status < 0
    }

    pub fn pathname(&self) -> &Path {
        &self.pathname
    }

    pub(crate) fn handle(&self) -> HandleId {
        self.handle
    }

    pub(crate) fn matches(&self, fd: Fd, pid: OwnerPid) -> bool {
        self.fd == fd && self.owner == pid
    }

    /// The owning process died; its descriptor table went with it, so the
    /// record must not close the handle.
    pub(crate) fn mark_host_released(&self) {
        self.handle_released.store(true, Ordering::Release);
    }

    /// `<pid>_<fd>` key used by the observability surface.
    pub fn view_key(&self) -> String {
        format!("{}_{}", self.owner.as_u32(), self.fd.as_raw())
    }
}

impl Drop for Incarnation {
    fn drop(&mut self) {
        if !self.handle_released.load(Ordering::Acquire) {
            if let Err(err) = self.fs.close(self.handle) {
                warn!(
                    pathname = %self.pathname.display(),
                    error = %err,
                    "failed to close incarnation handle"
                );
            }
        }
    }
}

impl fmt::Debug for Incarnation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incarnation")
            .field("owner", &self.owner)
            .field("fd", &self.fd)
            .field("pathname", &self.pathname)
            .field("status", &self.status)
            .finish()
    }
}

/// Per-original aggregation of live incarnations plus the open handle on
/// the original.
///
/// The `Arc<Session>` strong count is the record's refcount: the registry
/// holds one reference through its link node and every in-flight
/// operation that found the session holds another. The original handle
/// stays open for the whole lifetime of the record and is closed on drop.
///
/// The session lock's read side guards observation and creation of
/// incarnations; the write side guards destruction and any write-back
/// over the original.
pub struct Session {
    pathname: PathBuf,
    original: HandleId,
    lock: RwLock<()>,
    valid: AtomicBool,
    incarnations: Mutex<Vec<Arc<Incarnation>>>,
    fs: Arc<dyn HostFs>,
}

impl Session {
    pub(crate) fn new(pathname: PathBuf, original: HandleId, fs: Arc<dyn HostFs>) -> Self {
        Self {
            pathname,
            original,
            lock: RwLock::new(()),
            valid: AtomicBool::new(true),
            incarnations: Mutex::new(Vec::new()),
            fs,
        }
    }

    pub fn pathname(&self) -> &Path {
        &self.pathname
    }

    pub(crate) fn original(&self) -> HandleId {
        self.original
    }

    /// False once the session is flagged for removal; searches skip
    /// invalid sessions and creators that raced teardown retry.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub(crate) fn lock(&self) -> &RwLock<()> {
        &self.lock
    }

    pub fn incarnation_count(&self) -> usize {
        self.incarnations.lock().unwrap().len()
    }

    /// Publish a new incarnation. Callers hold the session read lock,
    /// which keeps teardown out; the inner mutex only orders appends.
    pub(crate) fn push_incarnation(&self, incarnation: Arc<Incarnation>) {
        self.incarnations.lock().unwrap().push(incarnation);
    }

    /// Remove the incarnation keyed `(fd, pid)`. Callers hold the session
    /// write lock; the unique key makes the match deterministic.
    pub(crate) fn remove_incarnation(&self, fd: Fd, pid: OwnerPid) -> Option<Arc<Incarnation>> {
        let mut incarnations = self.incarnations.lock().unwrap();
        let index = incarnations.iter().position(|inc| inc.matches(fd, pid))?;
        Some(incarnations.swap_remove(index))
    }

    /// Extract the whole collection en masse (sweep). Callers hold the
    /// session write lock.
    pub(crate) fn drain_incarnations(&self) -> Vec<Arc<Incarnation>> {
        std::mem::take(&mut *self.incarnations.lock().unwrap())
    }

    /// Reinstall the surviving incarnations after a sweep pass.
    pub(crate) fn reinstall_incarnations(&self, survivors: Vec<Arc<Incarnation>>) {
        *self.incarnations.lock().unwrap() = survivors;
    }

    /// Clone the collection for read-only observation. Callers hold the
    /// session read lock.
    pub(crate) fn incarnations_snapshot(&self) -> Vec<Arc<Incarnation>> {
        self.incarnations.lock().unwrap().clone()
    }

    /// Slash-for-dash pathname key used by the observability surface.
    pub fn view_key(&self) -> String {
        self.pathname.to_string_lossy().replace('/', "-")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // the original handle lives exactly as long as the record
        if let Err(err) = self.fs.close(self.original) {
            if !matches!(err, SessError::BadFileDescriptor) {
                warn!(
                    pathname = %self.pathname.display(),
                    error = %err,
                    "failed to close original handle"
                );
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pathname", &self.pathname)
            .field("valid", &self.is_valid())
            .field("incarnations", &self.incarnation_count())
            .finish()
    }
}

/// Construct the unique incarnation pathname for a creation:
/// `<original>_incarnation_<pid>_<nanos>`, or `/var/tmp/<pid>_<nanos>`
/// when the host path limit would overflow.
pub(crate) fn incarnation_pathname(original: &Path, pid: OwnerPid) -> PathBuf {
    let nanos = monotonic_nanos();
    let candidate = format!(
        "{}_incarnation_{}_{}",
        original.display(),
        pid.as_u32(),
        nanos
    );
    if candidate.len() >= libc::PATH_MAX as usize {
        PathBuf::from(format!("/var/tmp/{}_{}", pid.as_u32(), nanos))
    } else {
        PathBuf::from(candidate)
    }
}

/// Strictly increasing nanosecond timestamps, so concurrent creations by
/// the same process still get distinct incarnation names.
fn monotonic_nanos() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64);
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}
